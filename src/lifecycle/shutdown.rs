//! Shutdown coordination for the gateway.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks hold child tokens; cancelling the root cancels them all.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// The root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the root that can also be cancelled on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_children() {
        let shutdown = Shutdown::new();
        let child = shutdown.child_token();
        let grandchild = child.child_token();

        child.cancel();
        assert!(grandchild.is_cancelled());
        assert!(!shutdown.is_triggered());

        let other = shutdown.child_token();
        shutdown.trigger();
        other.cancelled().await;
        assert!(shutdown.is_triggered());
    }
}
