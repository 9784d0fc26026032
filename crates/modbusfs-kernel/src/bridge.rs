//! Serialized register access over the single shared link.
//!
//! A Modbus line carries one request/response exchange at a time, so every
//! transaction, whatever slave it targets, runs under one async mutex. The
//! guard is dropped on every return path, success or failure. Nothing is
//! retried here; a failed exchange goes straight back to the caller.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::TransportError;

/// One connected Modbus link.
///
/// Implementations are driven only through [`ProtocolBridge`], which holds
/// exclusive access for the whole select-then-transact sequence.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Make `address` the target of subsequent requests.
    fn select_slave(&mut self, address: u8);

    /// Read one holding register of the selected slave.
    async fn read_register(&mut self, index: u16) -> Result<u16, TransportError>;

    /// Write one holding register of the selected slave.
    async fn write_register(&mut self, index: u16, value: u16) -> Result<(), TransportError>;
}

/// Owner of the shared transport.
pub struct ProtocolBridge {
    transport: Mutex<Box<dyn RegisterTransport>>,
}

impl std::fmt::Debug for ProtocolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolBridge")
            .field("transport", &"<locked>")
            .finish()
    }
}

impl ProtocolBridge {
    pub fn new(transport: impl RegisterTransport + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn RegisterTransport>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    pub async fn read_register(&self, address: u8, index: u16) -> Result<u16, TransportError> {
        let mut transport = self.transport.lock().await;
        transport.select_slave(address);
        let result = transport.read_register(index).await;
        if let Err(e) = &result {
            tracing::warn!(address, index, error = %e, "register read failed");
        }
        result
    }

    pub async fn write_register(
        &self,
        address: u8,
        index: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let mut transport = self.transport.lock().await;
        transport.select_slave(address);
        let result = transport.write_register(index, value).await;
        if let Err(e) = &result {
            tracing::warn!(address, index, value, error = %e, "register write failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct MapTransport {
        selected: u8,
        words: Arc<parking_lot::Mutex<HashMap<(u8, u16), u16>>>,
    }

    #[async_trait]
    impl RegisterTransport for MapTransport {
        fn select_slave(&mut self, address: u8) {
            self.selected = address;
        }

        async fn read_register(&mut self, index: u16) -> Result<u16, TransportError> {
            self.words
                .lock()
                .get(&(self.selected, index))
                .copied()
                .ok_or(TransportError::ShortResponse(0))
        }

        async fn write_register(&mut self, index: u16, value: u16) -> Result<(), TransportError> {
            self.words.lock().insert((self.selected, index), value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_selects_slave_per_transaction() {
        let words = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let bridge = ProtocolBridge::new(MapTransport {
            selected: 0,
            words: words.clone(),
        });

        bridge.write_register(1, 5, 0x11).await.unwrap();
        bridge.write_register(2, 5, 0x22).await.unwrap();

        assert_eq!(bridge.read_register(1, 5).await.unwrap(), 0x11);
        assert_eq!(bridge.read_register(2, 5).await.unwrap(), 0x22);
        assert_eq!(words.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_releases_lock() {
        let bridge = ProtocolBridge::new(MapTransport::default());
        assert!(bridge.read_register(1, 5).await.is_err());
        // A second transaction would deadlock if the guard leaked
        bridge.write_register(1, 5, 7).await.unwrap();
        assert_eq!(bridge.read_register(1, 5).await.unwrap(), 7);
    }
}
