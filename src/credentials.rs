use std::sync::Mutex;

/// Caller-supplied credential sink.
///
/// The session forwards a refreshed credential observed on the opening
/// response through `update` before delivering any data. `invalidate` is
/// invoked by the caller, not the session, after an authorization failure
/// and before any retry is attempted.
pub trait CredentialStore: Send + Sync {
    fn update(&self, credential: String);
    fn invalidate(&self, key: &str);
}

/// Single-slot in-memory credential holder.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credential: Mutex<Option<String>>,
}

impl InMemoryCredentialStore {
    pub fn with_credential(credential: &str) -> Self {
        Self {
            credential: Mutex::new(Some(credential.to_string())),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.credential.lock().unwrap().clone()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn update(&self, credential: String) {
        *self.credential.lock().unwrap() = Some(credential);
    }

    fn invalidate(&self, _key: &str) {
        *self.credential.lock().unwrap() = None;
    }
}
