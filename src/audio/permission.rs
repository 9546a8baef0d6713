/// Gate for microphone access
#[async_trait::async_trait]
pub trait PermissionGate: Send + Sync {
    /// Ask for microphone access, returning whether it is granted
    async fn request_microphone_access(&self) -> bool;
}

/// Permission gate with a fixed answer
///
/// Used where access is decided up front, e.g. by a command-line flag.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

#[async_trait::async_trait]
impl PermissionGate for StaticPermission {
    async fn request_microphone_access(&self) -> bool {
        self.0
    }
}
