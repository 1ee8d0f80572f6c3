//! Link supervision.
//!
//! A failed telemetry stream only flips the link state to
//! [`LinkState::Failed`]; it does not close anything.  [`supervise`] is the
//! collaborator that notices and releases the socket.

use std::sync::Arc;

use rovlink_middleware::RobotLink;
use rovlink_types::LinkState;
use tracing::{error, info};

/// Wait until `link` reaches a terminal state and return it.
///
/// On `Failed` the link is shut down so its socket and receiver task are
/// released; on `Closed` someone else already did.
pub async fn supervise(link: Arc<RobotLink>) -> LinkState {
    let mut states = link.watch_state();
    let terminal = match states.wait_for(|s| s.is_terminal()).await {
        Ok(state) => *state,
        // The link owns the sender, and we hold the link.
        Err(_) => link.state(),
    };

    match terminal {
        LinkState::Failed => {
            error!(
                host = link.host(),
                port = link.port(),
                "robot link failed; releasing it"
            );
            link.shutdown().await;
        }
        state => info!(%state, "robot link ended"),
    }
    terminal
}

#[cfg(test)]
mod tests {
    use super::*;
    use rovlink_types::LinkError;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn connect() -> (Arc<RobotLink>, tokio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (link, accepted) = tokio::join!(
            RobotLink::connect_to("127.0.0.1", port),
            listener.accept()
        );
        (Arc::new(link.unwrap()), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn failed_link_is_shut_down() {
        let (link, mut robot) = connect().await;
        let supervisor = tokio::spawn(supervise(Arc::clone(&link)));

        robot.write_all(b"reward 1\n\n").await.unwrap();
        assert_eq!(supervisor.await.unwrap(), LinkState::Failed);
        assert_eq!(link.store().reward(), Some(1));
        assert!(matches!(link.set_speed(0.1).await, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn closed_link_is_reported() {
        let (link, _robot) = connect().await;
        let supervisor = tokio::spawn(supervise(Arc::clone(&link)));

        link.shutdown().await;
        assert_eq!(supervisor.await.unwrap(), LinkState::Closed);
    }
}
