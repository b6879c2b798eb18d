//! Node command client: administrative directives sent to a single node.

use crate::error::{OperatorError, OperatorFuture, OperatorResult};
use crate::topology::split_host_port;
use std::time::Duration;

/// Reply a node must return to acknowledge a directive.
pub const ACK: &str = "OK";

/// Sends replication directives to nodes.
///
/// Implementations do not retry; retry policy belongs to the caller.
/// Directives must be safe to resend: promoting a master or attaching a
/// replica to its current master are no-ops on the node.
pub trait NodeCommandClient: Send + Sync {
    /// Make the node a standalone master.
    ///
    /// # Errors
    ///
    /// - `Command` on transport failure or a reply other than [`ACK`]
    fn become_master<'a>(&'a self, node_address: &'a str) -> OperatorFuture<'a, ()>;

    /// Make the node replicate from `master_address` (`host:port`).
    ///
    /// # Errors
    ///
    /// - `Command` on transport failure or a reply other than [`ACK`]
    fn attach_to<'a>(&'a self, node_address: &'a str, master_address: &'a str)
    -> OperatorFuture<'a, ()>;
}

/// Directive client speaking the Redis protocol (`SLAVEOF`).
///
/// Opens a fresh connection per directive.
#[derive(Debug, Clone, Default)]
pub struct RedisCommandClient {
    timeout: Option<Duration>,
}

impl RedisCommandClient {
    /// Create a client relying on transport timeouts only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound connect plus reply of each directive.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    async fn send(&self, node_address: &str, command: redis::Cmd, directive: &str) -> OperatorResult<()> {
        tracing::debug!(node = %node_address, directive = %directive, "Sending directive");

        let client = redis::Client::open(format!("redis://{}", node_address))
            .map_err(|e| OperatorError::command(node_address, e))?;

        let exchange = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let reply: String = command.query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(reply)
        };

        let reply = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                OperatorError::command(node_address, format!("{} timed out after {:?}", directive, limit))
            })?,
            None => exchange.await,
        }
        .map_err(|e| OperatorError::command(node_address, e))?;

        check_ack(node_address, directive, &reply)
    }
}

impl NodeCommandClient for RedisCommandClient {
    fn become_master<'a>(&'a self, node_address: &'a str) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            let mut command = redis::cmd("SLAVEOF");
            command.arg("NO").arg("ONE");
            self.send(node_address, command, "SLAVEOF NO ONE").await
        })
    }

    fn attach_to<'a>(
        &'a self,
        node_address: &'a str,
        master_address: &'a str,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            let (host, port) = split_host_port(master_address).ok_or_else(|| {
                OperatorError::command(node_address, format!("invalid master address {}", master_address))
            })?;

            let mut command = redis::cmd("SLAVEOF");
            command.arg(host).arg(port);
            let directive = format!("SLAVEOF {} {}", host, port);
            self.send(node_address, command, &directive).await
        })
    }
}

/// Require the positive acknowledgement from a directive reply.
pub fn check_ack(node_address: &str, directive: &str, reply: &str) -> OperatorResult<()> {
    if reply == ACK {
        Ok(())
    } else {
        Err(OperatorError::command(
            node_address,
            format!("{} answered {:?}", directive, reply),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reply_is_accepted() {
        assert!(check_ack("10.0.0.1:6379", "SLAVEOF NO ONE", "OK").is_ok());
    }

    #[test]
    fn any_other_reply_is_a_command_error() {
        let err = check_ack("10.0.0.2:6379", "SLAVEOF 10.0.0.1 6379", "QUEUED").unwrap_err();
        match err {
            OperatorError::Command { address, reason } => {
                assert_eq!(address, "10.0.0.2:6379");
                assert!(reason.contains("QUEUED"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_master_address_fails_before_connecting() {
        let client = RedisCommandClient::new();
        let err = client.attach_to("10.0.0.2:6379", "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, OperatorError::Command { .. }));
    }

    #[tokio::test]
    async fn unreachable_node_is_a_command_error() {
        let client = RedisCommandClient::with_timeout(Some(Duration::from_millis(500)));
        let err = client.become_master("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, OperatorError::Command { address, .. } if address == "127.0.0.1:1"));
    }
}
