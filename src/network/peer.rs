// Peer bookkeeping and one-shot connections

use crate::error::{ChainError, Result};
use crate::network::Message;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Largest message accepted from a peer
pub const MAX_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;

/// Known peer addresses; the first entry is the bootstrap node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSet {
    addrs: Vec<String>,
}

impl PeerSet {
    pub fn new(bootstrap: impl Into<String>) -> Self {
        Self {
            addrs: vec![bootstrap.into()],
        }
    }

    /// The bootstrap node, unless it has been removed after a failed send
    pub fn bootstrap(&self) -> Option<&str> {
        self.addrs.first().map(String::as_str)
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.addrs.iter().any(|known| known == addr)
    }

    /// Learn an address; returns false if it was already known
    pub fn add(&mut self, addr: &str) -> bool {
        if self.contains(addr) {
            return false;
        }
        self.addrs.push(addr.to_string());
        true
    }

    pub fn remove(&mut self, addr: &str) -> bool {
        let before = self.addrs.len();
        self.addrs.retain(|known| known != addr);
        self.addrs.len() != before
    }

    /// Every known address except those in `excluded`
    pub fn others(&self, excluded: &[&str]) -> Vec<String> {
        self.addrs
            .iter()
            .filter(|addr| !excluded.contains(&addr.as_str()))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<String> {
        self.addrs.clone()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// Connect, write one message and close
pub async fn send_message(addr: &str, message: &Message, io_timeout: Duration) -> Result<()> {
    let data = message.encode();

    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&data).await?;
        stream.shutdown().await?;
        Ok::<_, std::io::Error>(())
    };

    match timeout(io_timeout, exchange).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ChainError::Network(format!("{}: {}", addr, e))),
        Err(_) => Err(ChainError::Network(format!("{}: timed out", addr))),
    }
}

/// Read the single message carried by an inbound connection
pub async fn receive_message(stream: &mut TcpStream, io_timeout: Duration) -> Result<Message> {
    let mut data = Vec::new();
    let read = async {
        let mut limited = stream.take(MAX_MESSAGE_SIZE + 1);
        limited.read_to_end(&mut data).await
    };

    match timeout(io_timeout, read).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(ChainError::Network(e.to_string())),
        Err(_) => return Err(ChainError::Network("timed out reading message".to_string())),
    }

    if data.len() as u64 > MAX_MESSAGE_SIZE {
        return Err(ChainError::Protocol("Message too large".to_string()));
    }

    Message::decode(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_peer_set() {
        let mut peers = PeerSet::new("localhost:3000");
        assert_eq!(peers.bootstrap(), Some("localhost:3000"));

        assert!(peers.add("localhost:3001"));
        assert!(!peers.add("localhost:3001"));
        assert!(peers.add("localhost:3002"));
        assert_eq!(peers.len(), 3);

        assert_eq!(
            peers.others(&["localhost:3000", "localhost:3002"]),
            vec!["localhost:3001".to_string()]
        );

        assert!(peers.remove("localhost:3000"));
        assert!(!peers.remove("localhost:3000"));
        assert_eq!(peers.bootstrap(), Some("localhost:3001"));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let message = Message::GetBlocks {
            addr_from: "localhost:3009".to_string(),
        };
        let expected = message.clone();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            receive_message(&mut stream, Duration::from_secs(5)).await.unwrap()
        });

        send_message(&addr, &message, Duration::from_secs(5)).await.unwrap();
        assert_eq!(server.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_send_to_unreachable_peer() {
        // Bind then drop so the port is closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let message = Message::GetBlocks {
            addr_from: "localhost:3009".to_string(),
        };
        let result = send_message(&addr, &message, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ChainError::Network(_))));
    }
}
