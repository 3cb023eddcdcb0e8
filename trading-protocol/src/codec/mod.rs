//! Length-prefixed binary framing for [`Message`].
//!
//! Frame layout (all multi-byte integers big-endian):
//!
//! ```text
//! header  : version u32 | message_size u32 | message_type u32
//!         | payload_size u32 | checksum u32
//! payload : sequence u64 | timestamp i64 | body
//! ```
//!
//! The body is a fixed-size record selected by the message type; strings are
//! NUL-padded to their field width. The checksum covers the whole payload
//! region and is a rolling `h = h*33 + byte` hash, an integrity check against
//! corruption and truncation rather than an authenticator.

use crate::model::{
    ErrorInfo, MarketData, Message, MessagePayload, MessageType, Order, OrderSide,
    OrderStatus, OrderType, Price, TimeInForce, TradeExecution, MAX_CLIENT_ID_LEN,
    MAX_ERROR_MSG_LEN, MAX_SYMBOL_LEN,
};
use thiserror::Error;


/// Protocol version accepted by [`decode`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 20;

/// Upper bound on a whole frame; anything larger is rejected unparsed.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Sequence number + timestamp prefix present in every payload.
const PREAMBLE_LEN: usize = 16;

const ORDER_BODY_LEN: usize = 120;
const MARKET_DATA_BODY_LEN: usize = 84;
const TRADE_BODY_LEN: usize = 120;
const ERROR_BODY_LEN: usize = 4 + MAX_ERROR_MSG_LEN;

/// Encoding/decoding failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("field {field} exceeds its wire width of {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("frame of {size} bytes exceeds maximum message size of {max}")]
    FrameTooLarge { size: usize, max: usize },
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },
    #[error("unsupported protocol version {found}, expected {expected}")]
    InvalidVersion { expected: u32, found: u32 },
    #[error("unknown message type tag {0}")]
    InvalidType(u32),
    #[error("invalid value {value} for field {field}")]
    InvalidEnum { field: &'static str, value: u32 },
    #[error("field {field} is not valid UTF-8")]
    InvalidString { field: &'static str },
    #[error("checksum mismatch: header declares {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("payload size {found} does not match the expected {expected}")]
    SizeMismatch { expected: usize, found: usize },
}

/// Rolling multiplicative hash over the payload region.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |hash, &byte| hash.wrapping_mul(33).wrapping_add(byte as u32))
}

fn body_len(message_type: MessageType) -> usize {
    match message_type {
        MessageType::Heartbeat => 0,
        MessageType::OrderNew
        | MessageType::OrderCancel
        | MessageType::OrderModify
        | MessageType::OrderStatus => ORDER_BODY_LEN,
        MessageType::MarketData => MARKET_DATA_BODY_LEN,
        MessageType::TradeExec => TRADE_BODY_LEN,
        MessageType::Error => ERROR_BODY_LEN,
    }
}

/// Total frame size a complete header declares. The caller must supply at
/// least [`HEADER_LEN`] bytes.
pub fn declared_size(header: &[u8; HEADER_LEN]) -> usize {
    read_u32(header, 4) as usize
}

/// Encodes a message into a complete frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let message_type = message.message_type();
    let payload_size = PREAMBLE_LEN + body_len(message_type);
    let total = HEADER_LEN + payload_size;
    if total > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: total,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut writer = FrameWriter::with_capacity(total);
    writer.put_u32(PROTOCOL_VERSION);
    writer.put_u32(total as u32);
    writer.put_u32(message_type as u32);
    writer.put_u32(payload_size as u32);
    writer.put_u32(0); // checksum, patched below

    writer.put_u64(message.sequence);
    writer.put_i64(message.timestamp);
    match &message.payload {
        MessagePayload::Heartbeat => {}
        MessagePayload::OrderNew(order)
        | MessagePayload::OrderCancel(order)
        | MessagePayload::OrderModify(order)
        | MessagePayload::OrderStatus(order) => write_order(&mut writer, order)?,
        MessagePayload::MarketData(data) => write_market_data(&mut writer, data)?,
        MessagePayload::TradeExec(trade) => write_trade(&mut writer, trade)?,
        MessagePayload::Error(info) => write_error(&mut writer, info)?,
    }

    let mut frame = writer.into_inner();
    let digest = checksum(&frame[HEADER_LEN..]);
    frame[16..HEADER_LEN].copy_from_slice(&digest.to_be_bytes());
    Ok(frame)
}

/// Decodes one frame from the front of `buf`.
///
/// Returns the message and the number of bytes consumed. The header is
/// validated first, then the checksum over the payload region, and only then
/// is the payload parsed; any failure discards the frame.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Incomplete {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }

    let version = read_u32(buf, 0);
    let message_size = read_u32(buf, 4) as usize;
    let type_tag = read_u32(buf, 8);
    let payload_size = read_u32(buf, 12) as usize;
    let declared_checksum = read_u32(buf, 16);

    if version != PROTOCOL_VERSION {
        return Err(CodecError::InvalidVersion {
            expected: PROTOCOL_VERSION,
            found: version,
        });
    }
    if message_size > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: message_size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if message_size < HEADER_LEN || message_size != HEADER_LEN + payload_size {
        return Err(CodecError::SizeMismatch {
            expected: HEADER_LEN + payload_size,
            found: message_size,
        });
    }
    if buf.len() < message_size {
        return Err(CodecError::Incomplete {
            needed: message_size,
            available: buf.len(),
        });
    }

    let payload = &buf[HEADER_LEN..message_size];
    let computed = checksum(payload);
    if computed != declared_checksum {
        return Err(CodecError::ChecksumMismatch {
            expected: declared_checksum,
            computed,
        });
    }

    let message_type = MessageType::from_wire(type_tag).ok_or(CodecError::InvalidType(type_tag))?;
    let expected_payload = PREAMBLE_LEN + body_len(message_type);
    if payload_size != expected_payload {
        return Err(CodecError::SizeMismatch {
            expected: expected_payload,
            found: payload_size,
        });
    }

    let mut reader = FrameReader::new(payload);
    let sequence = reader.take_u64();
    let timestamp = reader.take_i64();
    let payload = match message_type {
        MessageType::Heartbeat => MessagePayload::Heartbeat,
        MessageType::OrderNew => MessagePayload::OrderNew(read_order(&mut reader)?),
        MessageType::OrderCancel => MessagePayload::OrderCancel(read_order(&mut reader)?),
        MessageType::OrderModify => MessagePayload::OrderModify(read_order(&mut reader)?),
        MessageType::OrderStatus => MessagePayload::OrderStatus(read_order(&mut reader)?),
        MessageType::MarketData => MessagePayload::MarketData(read_market_data(&mut reader)?),
        MessageType::TradeExec => MessagePayload::TradeExec(read_trade(&mut reader)?),
        MessageType::Error => MessagePayload::Error(read_error(&mut reader)?),
    };

    Ok((
        Message {
            sequence,
            timestamp,
            payload,
        },
        message_size,
    ))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_price(&mut self, price: Price) {
        self.put_i64(price.mantissa());
        self.put_i32(price.exponent());
    }

    fn put_fixed_str(
        &mut self,
        value: &str,
        width: usize,
        field: &'static str,
    ) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        if bytes.len() > width {
            return Err(CodecError::FieldTooLong { field, max: width });
        }
        self.buf.extend_from_slice(bytes);
        self.buf.extend(std::iter::repeat(0u8).take(width - bytes.len()));
        Ok(())
    }
}

/// Cursor over a payload whose length has already been validated against the
/// fixed record size for its type, so field reads cannot run out of bytes.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    fn take_u32(&mut self) -> u32 {
        let b = self.take(4);
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    fn take_i32(&mut self) -> i32 {
        let b = self.take(4);
        i32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    fn take_u64(&mut self) -> u64 {
        let b = self.take(8);
        u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    fn take_i64(&mut self) -> i64 {
        let b = self.take(8);
        i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    fn take_price(&mut self) -> Price {
        let mantissa = self.take_i64();
        let exponent = self.take_i32();
        Price::new(mantissa, exponent)
    }

    fn take_fixed_str(
        &mut self,
        width: usize,
        field: &'static str,
    ) -> Result<String, CodecError> {
        let raw = self.take(width);
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        std::str::from_utf8(&raw[..end])
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidString { field })
    }
}

fn write_order(writer: &mut FrameWriter, order: &Order) -> Result<(), CodecError> {
    writer.put_u64(order.order_id);
    writer.put_fixed_str(&order.symbol, MAX_SYMBOL_LEN, "symbol")?;
    writer.put_fixed_str(&order.client_id, MAX_CLIENT_ID_LEN, "client_id")?;
    writer.put_u32(order.order_type as u32);
    writer.put_u32(order.side as u32);
    writer.put_u32(order.status as u32);
    writer.put_u32(order.time_in_force as u32);
    writer.put_price(order.price);
    writer.put_u32(order.quantity);
    writer.put_u32(order.filled_quantity);
    writer.put_u32(order.remaining_quantity);
    writer.put_i64(order.created_at);
    writer.put_i64(order.modified_at);
    writer.put_i64(order.expires_at);
    Ok(())
}

fn read_order(reader: &mut FrameReader<'_>) -> Result<Order, CodecError> {
    let order_id = reader.take_u64();
    let symbol = reader.take_fixed_str(MAX_SYMBOL_LEN, "symbol")?;
    let client_id = reader.take_fixed_str(MAX_CLIENT_ID_LEN, "client_id")?;
    let order_type = take_enum(reader, "order_type", OrderType::from_wire)?;
    let side = take_enum(reader, "side", OrderSide::from_wire)?;
    let status = take_enum(reader, "status", OrderStatus::from_wire)?;
    let time_in_force = take_enum(reader, "time_in_force", TimeInForce::from_wire)?;
    Ok(Order {
        order_id,
        symbol,
        client_id,
        order_type,
        side,
        status,
        time_in_force,
        price: reader.take_price(),
        quantity: reader.take_u32(),
        filled_quantity: reader.take_u32(),
        remaining_quantity: reader.take_u32(),
        created_at: reader.take_i64(),
        modified_at: reader.take_i64(),
        expires_at: reader.take_i64(),
    })
}

fn write_market_data(writer: &mut FrameWriter, data: &MarketData) -> Result<(), CodecError> {
    writer.put_fixed_str(&data.symbol, MAX_SYMBOL_LEN, "symbol")?;
    writer.put_price(data.last_price);
    writer.put_price(data.bid);
    writer.put_price(data.ask);
    writer.put_u32(data.last_size);
    writer.put_u32(data.bid_size);
    writer.put_u32(data.ask_size);
    writer.put_u64(data.volume);
    writer.put_u32(data.num_trades);
    writer.put_i64(data.timestamp);
    Ok(())
}

fn read_market_data(reader: &mut FrameReader<'_>) -> Result<MarketData, CodecError> {
    Ok(MarketData {
        symbol: reader.take_fixed_str(MAX_SYMBOL_LEN, "symbol")?,
        last_price: reader.take_price(),
        bid: reader.take_price(),
        ask: reader.take_price(),
        last_size: reader.take_u32(),
        bid_size: reader.take_u32(),
        ask_size: reader.take_u32(),
        volume: reader.take_u64(),
        num_trades: reader.take_u32(),
        timestamp: reader.take_i64(),
    })
}

fn write_trade(writer: &mut FrameWriter, trade: &TradeExecution) -> Result<(), CodecError> {
    writer.put_u64(trade.trade_id);
    writer.put_u64(trade.order_id);
    writer.put_fixed_str(&trade.symbol, MAX_SYMBOL_LEN, "symbol")?;
    writer.put_price(trade.price);
    writer.put_u32(trade.quantity);
    writer.put_i64(trade.timestamp);
    writer.put_fixed_str(&trade.buyer_id, MAX_CLIENT_ID_LEN, "buyer_id")?;
    writer.put_fixed_str(&trade.seller_id, MAX_CLIENT_ID_LEN, "seller_id")?;
    Ok(())
}

fn read_trade(reader: &mut FrameReader<'_>) -> Result<TradeExecution, CodecError> {
    Ok(TradeExecution {
        trade_id: reader.take_u64(),
        order_id: reader.take_u64(),
        symbol: reader.take_fixed_str(MAX_SYMBOL_LEN, "symbol")?,
        price: reader.take_price(),
        quantity: reader.take_u32(),
        timestamp: reader.take_i64(),
        buyer_id: reader.take_fixed_str(MAX_CLIENT_ID_LEN, "buyer_id")?,
        seller_id: reader.take_fixed_str(MAX_CLIENT_ID_LEN, "seller_id")?,
    })
}

fn write_error(writer: &mut FrameWriter, info: &ErrorInfo) -> Result<(), CodecError> {
    writer.put_i32(info.code);
    writer.put_fixed_str(&info.message, MAX_ERROR_MSG_LEN, "error_message")
}

fn read_error(reader: &mut FrameReader<'_>) -> Result<ErrorInfo, CodecError> {
    Ok(ErrorInfo {
        code: reader.take_i32(),
        message: reader.take_fixed_str(MAX_ERROR_MSG_LEN, "error_message")?,
    })
}

fn take_enum<T>(
    reader: &mut FrameReader<'_>,
    field: &'static str,
    from_wire: fn(u32) -> Option<T>,
) -> Result<T, CodecError> {
    let value = reader.take_u32();
    from_wire(value).ok_or(CodecError::InvalidEnum { field, value })
}
