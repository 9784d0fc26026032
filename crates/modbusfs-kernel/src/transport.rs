//! tokio-modbus backed [`RegisterTransport`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, tcp, Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};
use tokio_serial::SerialPortBuilderExt;

use crate::bridge::RegisterTransport;
use crate::config::{RtuConfig, TcpConfig, TransportConfig};
use crate::error::TransportError;

/// A connected Modbus client context.
pub struct ModbusTransport {
    ctx: Context,
    response_timeout: Option<Duration>,
}

impl std::fmt::Debug for ModbusTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusTransport")
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

impl ModbusTransport {
    pub fn new(ctx: Context, response_timeout: Option<Duration>) -> Self {
        Self {
            ctx,
            response_timeout,
        }
    }
}

/// Open the configured link. Called once at startup; the link is never
/// re-established afterwards.
pub async fn connect(
    config: &TransportConfig,
    response_timeout: Option<Duration>,
) -> Result<ModbusTransport, TransportError> {
    let ctx = match config {
        TransportConfig::Rtu(rtu) => connect_rtu(rtu)?,
        TransportConfig::Tcp(tcp) => connect_tcp(tcp).await?,
    };
    tracing::info!(link = %config, ?response_timeout, "modbus link established");
    Ok(ModbusTransport::new(ctx, response_timeout))
}

fn connect_rtu(cfg: &RtuConfig) -> Result<Context, TransportError> {
    let data_bits = cfg
        .data_bits()
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
    let stop_bits = cfg
        .stop_bits()
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
    let stream = tokio_serial::new(cfg.device.as_str(), cfg.baud)
        .data_bits(data_bits)
        .parity(cfg.parity.into())
        .stop_bits(stop_bits)
        .open_native_async()?;
    Ok(rtu::attach(stream))
}

async fn connect_tcp(cfg: &TcpConfig) -> Result<Context, TransportError> {
    let target = format!("{}:{}", cfg.host, cfg.port);
    let mut addrs = tokio::net::lookup_host(target.as_str()).await?;
    let addr = addrs.next().ok_or_else(|| TransportError::Resolve(target.clone()))?;
    Ok(tcp::connect(addr).await?)
}

async fn bounded<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = T>,
) -> Result<T, TransportError> {
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(limit)),
        None => Ok(fut.await),
    }
}

#[async_trait]
impl RegisterTransport for ModbusTransport {
    fn select_slave(&mut self, address: u8) {
        self.ctx.set_slave(Slave(address));
    }

    async fn read_register(&mut self, index: u16) -> Result<u16, TransportError> {
        let limit = self.response_timeout;
        let words = bounded(limit, self.ctx.read_holding_registers(index, 1)).await???;
        match words.as_slice() {
            [word] => Ok(*word),
            other => Err(TransportError::ShortResponse(other.len())),
        }
    }

    async fn write_register(&mut self, index: u16, value: u16) -> Result<(), TransportError> {
        let limit = self.response_timeout;
        bounded(limit, self.ctx.write_single_register(index, value)).await???;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn silent_peer() -> (TcpListener, TransportConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = TransportConfig::Tcp(TcpConfig {
            host: "127.0.0.1".into(),
            port,
        });
        (listener, config)
    }

    #[tokio::test]
    async fn test_connect_tcp() {
        let (_listener, config) = silent_peer().await;
        let transport = connect(&config, Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(transport.response_timeout, Some(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (_listener, config) = silent_peer().await;
        let mut transport = connect(&config, Some(Duration::from_millis(50))).await.unwrap();
        transport.select_slave(17);

        let err = transport.read_register(5).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{err}");
        let err = transport.write_register(5, 0x2a).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{err}");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, config) = silent_peer().await;
        drop(listener);
        assert!(connect(&config, None).await.is_err());
    }
}
