//! ESC/POS command builder for network receipt printers.
//!
//! Produces the raw byte stream sent to port 9100: text formatting,
//! alignment, paper cut and the cash drawer pulse. Text outside ASCII is
//! printed as `?`.

use crate::models::ReceiptPayload;

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// ESC p m t1 t2: pulse drawer pin 2, 50 ms on, 500 ms off.
pub const DRAWER_KICK: [u8; 5] = [ESC, 0x70, 0x00, 0x19, 0xFA];

/// Paper width in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperWidth {
    Mm58,
    Mm80,
}

impl PaperWidth {
    pub fn chars(self) -> usize {
        match self {
            PaperWidth::Mm58 => 32,
            PaperWidth::Mm80 => 48,
        }
    }
}

/// Builder for ESC/POS byte buffers.
///
/// ```rust,ignore
/// let mut b = EscPosBuilder::new(PaperWidth::Mm80);
/// b.init().center().bold(true).text("ORDER 501").lf().bold(false);
/// b.feed(3).cut();
/// let bytes = b.build();
/// ```
pub struct EscPosBuilder {
    buffer: Vec<u8>,
    paper: PaperWidth,
}

impl EscPosBuilder {
    pub fn new(paper: PaperWidth) -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            paper,
        }
    }

    /// ESC @
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// ESC E n
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x45, u8::from(on)]);
        self
    }

    /// GS ! n, width and height multipliers 1-8.
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    pub fn left(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 0]);
        self
    }

    pub fn center(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 1]);
        self
    }

    pub fn text(&mut self, s: &str) -> &mut Self {
        self.buffer
            .extend(s.chars().map(|ch| if ch.is_ascii() { ch as u8 } else { b'?' }));
        self
    }

    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    pub fn separator(&mut self) -> &mut Self {
        self.buffer
            .extend(std::iter::repeat(b'-').take(self.paper.chars()));
        self.lf()
    }

    /// Label left, value right, padded to the paper width.
    pub fn line_pair(&mut self, label: &str, value: &str) -> &mut Self {
        let width = self.paper.chars();
        let value_len = value.chars().count();
        let label: String = label
            .chars()
            .take(width.saturating_sub(value_len + 1))
            .collect();
        let gap = width.saturating_sub(label.chars().count() + value_len);
        self.text(&label);
        self.buffer.extend(std::iter::repeat(b' ').take(gap));
        self.text(value);
        self.lf()
    }

    /// ESC d n
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    /// GS V A 16: partial cut.
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x41, 0x10]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Render a customer receipt.
pub fn render_receipt(receipt: &ReceiptPayload, paper: PaperWidth) -> Vec<u8> {
    let mut b = EscPosBuilder::new(paper);
    b.init()
        .center()
        .bold(true)
        .text_size(2, 2)
        .text(&format!("ORDER {}", receipt.order_id))
        .lf()
        .text_size(1, 1)
        .bold(false)
        .left()
        .separator();

    for item in &receipt.items {
        let line_total = item.price * rust_decimal::Decimal::from(item.qty);
        b.line_pair(
            &format!("{} x {}", item.qty, item.name),
            &format!("{:.2}", line_total),
        );
    }

    b.separator()
        .bold(true)
        .line_pair("TOTAL", &format!("{:.2}", receipt.total))
        .bold(false)
        .feed(3)
        .cut();
    b.build()
}
