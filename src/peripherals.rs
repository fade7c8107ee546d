//! Receipt printer and cash drawer capability.
//!
//! Selected at startup: a network ESC/POS printer when `printer_addr` is
//! configured, otherwise a stub that only logs. Callers treat every failure
//! here as non-fatal; a missing receipt never fails an order.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::TerminalConfig;
use crate::error::PeripheralError;
use crate::escpos::{self, PaperWidth, DRAWER_KICK};
use crate::models::ReceiptPayload;

const DEFAULT_PRINTER_PORT: u16 = 9100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// Minimum interval between drawer kicks.
const MIN_KICK_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait Peripherals: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open_drawer(&self) -> Result<(), PeripheralError>;

    async fn print_receipt(&self, receipt: &ReceiptPayload) -> Result<(), PeripheralError>;
}

/// Pick the hardware implementation when a printer is configured.
pub fn detect(config: &TerminalConfig) -> Arc<dyn Peripherals> {
    match config.printer_addr.as_deref() {
        Some(addr) => match EscPosPeripherals::new(addr) {
            Ok(printer) => {
                let printer = printer.with_paper(config.receipt_paper);
                info!(addr = %printer.addr, paper = ?printer.paper, "Using ESC/POS network printer");
                Arc::new(printer)
            }
            Err(e) => {
                warn!("Printer disabled: {e}");
                Arc::new(StubPeripherals::default())
            }
        },
        None => {
            info!("No printer configured, peripheral actions are logged only");
            Arc::new(StubPeripherals::default())
        }
    }
}

// ---------------------------------------------------------------------------
// Stub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralAction {
    DrawerOpened,
    ReceiptPrinted { order_id: i64 },
}

/// No-hardware implementation. Records what it was asked to do.
#[derive(Default)]
pub struct StubPeripherals {
    actions: Mutex<Vec<PeripheralAction>>,
}

impl StubPeripherals {
    pub fn actions(&self) -> Vec<PeripheralAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, action: PeripheralAction) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

#[async_trait]
impl Peripherals for StubPeripherals {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn open_drawer(&self) -> Result<(), PeripheralError> {
        info!("[stub] open drawer");
        self.record(PeripheralAction::DrawerOpened);
        Ok(())
    }

    async fn print_receipt(&self, receipt: &ReceiptPayload) -> Result<(), PeripheralError> {
        info!(
            order_id = receipt.order_id,
            lines = receipt.items.len(),
            total = %receipt.total,
            "[stub] print receipt"
        );
        self.record(PeripheralAction::ReceiptPrinted {
            order_id: receipt.order_id,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ESC/POS over TCP
// ---------------------------------------------------------------------------

pub struct EscPosPeripherals {
    addr: SocketAddr,
    paper: PaperWidth,
    last_kick: Mutex<Option<Instant>>,
}

impl EscPosPeripherals {
    /// `addr` is `ip:port`, or a bare IP for port 9100.
    pub fn new(addr: &str) -> Result<Self, PeripheralError> {
        let addr = addr.trim();
        let parsed = addr
            .parse::<SocketAddr>()
            .or_else(|_| format!("{addr}:{DEFAULT_PRINTER_PORT}").parse::<SocketAddr>())
            .map_err(|_| PeripheralError::InvalidAddress(addr.to_string()))?;
        Ok(Self {
            addr: parsed,
            paper: PaperWidth::Mm80,
            last_kick: Mutex::new(None),
        })
    }

    pub fn with_paper(mut self, paper: PaperWidth) -> Self {
        self.paper = paper;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), PeripheralError> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .map_err(|_| PeripheralError::Timeout(CONNECT_TIMEOUT.as_millis()))??;

        timeout(WRITE_TIMEOUT, async {
            stream.write_all(bytes).await?;
            stream.flush().await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| PeripheralError::Timeout(WRITE_TIMEOUT.as_millis()))??;
        Ok(())
    }

    fn check_rate_limit(&self) -> Result<(), PeripheralError> {
        let mut last = self.last_kick.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < MIN_KICK_INTERVAL {
                return Err(PeripheralError::RateLimited(
                    (MIN_KICK_INTERVAL - elapsed).as_millis(),
                ));
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl Peripherals for EscPosPeripherals {
    fn name(&self) -> &'static str {
        "escpos-tcp"
    }

    async fn open_drawer(&self) -> Result<(), PeripheralError> {
        self.check_rate_limit()?;
        self.send(&DRAWER_KICK).await?;
        info!(addr = %self.addr, "ESC/POS drawer kick sent");
        Ok(())
    }

    async fn print_receipt(&self, receipt: &ReceiptPayload) -> Result<(), PeripheralError> {
        let bytes = escpos::render_receipt(receipt, self.paper);
        self.send(&bytes).await?;
        info!(addr = %self.addr, order_id = receipt.order_id, bytes = bytes.len(), "Receipt printed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn capture_server() -> (SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });
        (addr, handle)
    }

    #[test]
    fn test_address_parsing() {
        assert_eq!(
            EscPosPeripherals::new("192.168.1.50").unwrap().addr().port(),
            9100
        );
        assert_eq!(
            EscPosPeripherals::new("192.168.1.50:9101").unwrap().addr().port(),
            9101
        );
        assert!(matches!(
            EscPosPeripherals::new("not-an-ip"),
            Err(PeripheralError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_detect_falls_back_to_stub() {
        assert_eq!(detect(&TerminalConfig::default()).name(), "stub");
        let bad = TerminalConfig::default().with_printer_addr("printer.local");
        assert_eq!(detect(&bad).name(), "stub");
        let good = TerminalConfig::default().with_printer_addr("10.0.0.9:9100");
        assert_eq!(detect(&good).name(), "escpos-tcp");
    }

    #[tokio::test]
    async fn test_drawer_kick_sends_exact_bytes() {
        let (addr, server) = capture_server().await;
        let printer = EscPosPeripherals::new(&addr.to_string()).unwrap();

        printer.open_drawer().await.unwrap();
        assert_eq!(server.await.unwrap(), DRAWER_KICK.to_vec());
    }

    #[tokio::test]
    async fn test_drawer_kick_is_rate_limited() {
        let (addr, _server) = capture_server().await;
        let printer = EscPosPeripherals::new(&addr.to_string()).unwrap();

        printer.open_drawer().await.unwrap();
        assert!(matches!(
            printer.open_drawer().await,
            Err(PeripheralError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_print_receipt_sends_rendered_bytes() {
        let (addr, server) = capture_server().await;
        let printer = EscPosPeripherals::new(&addr.to_string()).unwrap();
        let receipt = ReceiptPayload {
            order_id: 501,
            items: Vec::new(),
            total: Decimal::ZERO,
        };

        printer.print_receipt(&receipt).await.unwrap();
        assert_eq!(
            server.await.unwrap(),
            escpos::render_receipt(&receipt, PaperWidth::Mm80)
        );
    }

    #[tokio::test]
    async fn test_narrow_paper_receipt_uses_58mm_layout() {
        let (addr, server) = capture_server().await;
        let printer = EscPosPeripherals::new(&addr.to_string())
            .unwrap()
            .with_paper(PaperWidth::Mm58);
        let receipt = ReceiptPayload {
            order_id: 502,
            items: Vec::new(),
            total: Decimal::ZERO,
        };

        printer.print_receipt(&receipt).await.unwrap();
        let sent = server.await.unwrap();
        assert_eq!(sent, escpos::render_receipt(&receipt, PaperWidth::Mm58));
        assert_ne!(sent, escpos::render_receipt(&receipt, PaperWidth::Mm80));
    }

    #[tokio::test]
    async fn test_refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let printer = EscPosPeripherals::new(&addr.to_string()).unwrap();
        assert!(matches!(
            printer.open_drawer().await,
            Err(PeripheralError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_stub_records_actions() {
        let stub = StubPeripherals::default();
        stub.open_drawer().await.unwrap();
        stub.print_receipt(&ReceiptPayload {
            order_id: 7,
            items: Vec::new(),
            total: Decimal::ZERO,
        })
        .await
        .unwrap();
        assert_eq!(
            stub.actions(),
            vec![
                PeripheralAction::DrawerOpened,
                PeripheralAction::ReceiptPrinted { order_id: 7 }
            ]
        );
    }
}
