//! Fixed-layout channel configuration blocks
//!
//! All integers are little-endian. Text fields are zero-padded to
//! [`UNIT_FIELD_SIZE`] bytes; the last byte is always zero.
//!
//! General-purpose measurement block (`MEASUREMENT_CONFIG_SIZE` = 99 bytes):
//! ```text
//! ┌──────────┬────────────┬───────┬───────────┬─────────────┬────────────┐
//! │ divider  │ multiplier │ added │ precision │ unit before │ unit after │
//! │ i32      │ i32        │ i64   │ u8        │ 15B         │ 15B        │
//! ├──────────┴──┬─────────┴───┬───┴───────────┴─────────────┴────────────┤
//! │ no space u8 │ history u8  │ chart u8 │ refresh ms u16               │
//! ├─────────────┴─────────────┴──────────┴──────────────────────────────┤
//! │ default divider, multiplier, added, precision, unit before, after  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use heapless::String;

/// Maximum unit text length in bytes
pub const UNIT_MAX_LEN: usize = 14;

/// Encoded unit field size (text plus terminating zero)
pub const UNIT_FIELD_SIZE: usize = UNIT_MAX_LEN + 1;

/// Encoded size of [`MeasurementConfigBlock`]
pub const MEASUREMENT_CONFIG_SIZE: usize = 99;

/// Encoded size of [`StaircaseTimerBlock`]
pub const STAIRCASE_TIMER_SIZE: usize = 4;

/// Unit label shown next to a measured value
pub type Unit = String<UNIT_MAX_LEN>;

/// Errors decoding a configuration block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockError {
    /// Payload size does not match the block layout
    WrongSize,
    /// A field holds an invalid value
    InvalidField,
}

/// Sequential little-endian writer over a fixed buffer
struct BlockWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BlockWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn put_unit(&mut self, unit: &str) {
        let mut field = [0u8; UNIT_FIELD_SIZE];
        let len = unit.len().min(UNIT_MAX_LEN);
        field[..len].copy_from_slice(&unit.as_bytes()[..len]);
        self.put(&field);
    }
}

/// Sequential little-endian reader over a fixed buffer
struct BlockReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn unit(&mut self) -> Result<Unit, BlockError> {
        let field = self.take::<UNIT_FIELD_SIZE>();
        let len = field.iter().position(|&b| b == 0).unwrap_or(UNIT_MAX_LEN);
        let text = core::str::from_utf8(&field[..len])
            .map_err(|_| BlockError::InvalidField)?;
        let mut unit = Unit::new();
        unit.push_str(text).map_err(|_| BlockError::InvalidField)?;
        Ok(unit)
    }
}

/// General-purpose measurement channel configuration
///
/// Carries both the live values and the compiled-in defaults so the server
/// can show "reset to default" and the device can detect a stale server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MeasurementConfigBlock {
    pub value_divider: i32,
    pub value_multiplier: i32,
    pub value_added: i64,
    pub value_precision: u8,
    pub unit_before_value: Unit,
    pub unit_after_value: Unit,
    pub no_space_after_value: u8,
    pub keep_history: u8,
    pub chart_type: u8,
    pub refresh_interval_ms: u16,
    pub default_value_divider: i32,
    pub default_value_multiplier: i32,
    pub default_value_added: i64,
    pub default_value_precision: u8,
    pub default_unit_before_value: Unit,
    pub default_unit_after_value: Unit,
}

impl MeasurementConfigBlock {
    /// Encode into the fixed wire layout
    pub fn encode(&self) -> [u8; MEASUREMENT_CONFIG_SIZE] {
        let mut out = [0u8; MEASUREMENT_CONFIG_SIZE];
        let mut w = BlockWriter::new(&mut out);
        w.put(&self.value_divider.to_le_bytes());
        w.put(&self.value_multiplier.to_le_bytes());
        w.put(&self.value_added.to_le_bytes());
        w.put(&[self.value_precision]);
        w.put_unit(&self.unit_before_value);
        w.put_unit(&self.unit_after_value);
        w.put(&[self.no_space_after_value, self.keep_history, self.chart_type]);
        w.put(&self.refresh_interval_ms.to_le_bytes());
        w.put(&self.default_value_divider.to_le_bytes());
        w.put(&self.default_value_multiplier.to_le_bytes());
        w.put(&self.default_value_added.to_le_bytes());
        w.put(&[self.default_value_precision]);
        w.put_unit(&self.default_unit_before_value);
        w.put_unit(&self.default_unit_after_value);
        out
    }

    /// Decode from the fixed wire layout
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() != MEASUREMENT_CONFIG_SIZE {
            return Err(BlockError::WrongSize);
        }
        let mut r = BlockReader::new(bytes);
        Ok(Self {
            value_divider: r.i32(),
            value_multiplier: r.i32(),
            value_added: r.i64(),
            value_precision: r.u8(),
            unit_before_value: r.unit()?,
            unit_after_value: r.unit()?,
            no_space_after_value: r.u8(),
            keep_history: r.u8(),
            chart_type: r.u8(),
            refresh_interval_ms: r.u16(),
            default_value_divider: r.i32(),
            default_value_multiplier: r.i32(),
            default_value_added: r.i64(),
            default_value_precision: r.u8(),
            default_unit_before_value: r.unit()?,
            default_unit_after_value: r.unit()?,
        })
    }
}

/// Staircase timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StaircaseTimerBlock {
    /// How long the light stays on
    pub time_ms: u32,
}

impl StaircaseTimerBlock {
    /// Encode into the fixed wire layout
    pub fn encode(&self) -> [u8; STAIRCASE_TIMER_SIZE] {
        self.time_ms.to_le_bytes()
    }

    /// Decode from the fixed wire layout
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        let raw: [u8; STAIRCASE_TIMER_SIZE] =
            bytes.try_into().map_err(|_| BlockError::WrongSize)?;
        Ok(Self {
            time_ms: u32::from_le_bytes(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit(text: &str) -> Unit {
        let mut u = Unit::new();
        u.push_str(text).unwrap();
        u
    }

    #[test]
    fn test_measurement_layout_offsets() {
        let block = MeasurementConfigBlock {
            value_divider: 1000,
            value_precision: 2,
            unit_after_value: unit("kWh"),
            refresh_interval_ms: 5000,
            default_value_added: -1,
            ..Default::default()
        };
        let bytes = block.encode();

        assert_eq!(&bytes[0..4], &1000i32.to_le_bytes());
        assert_eq!(bytes[16], 2);
        // unit after starts after two i32, one i64, precision and unit before
        assert_eq!(&bytes[32..35], b"kWh");
        assert_eq!(bytes[35], 0);
        assert_eq!(&bytes[50..52], &5000u16.to_le_bytes());
        assert_eq!(&bytes[60..68], &(-1i64).to_le_bytes());

        assert_eq!(MeasurementConfigBlock::decode(&bytes), Ok(block));
    }

    #[test]
    fn test_measurement_wrong_size() {
        let bytes = [0u8; MEASUREMENT_CONFIG_SIZE - 1];
        assert_eq!(
            MeasurementConfigBlock::decode(&bytes),
            Err(BlockError::WrongSize)
        );
    }

    #[test]
    fn test_measurement_invalid_utf8_unit() {
        let mut bytes = MeasurementConfigBlock::default().encode();
        bytes[17] = 0xFF;
        assert_eq!(
            MeasurementConfigBlock::decode(&bytes),
            Err(BlockError::InvalidField)
        );
    }

    #[test]
    fn test_staircase_block() {
        let block = StaircaseTimerBlock { time_ms: 90_000 };
        assert_eq!(StaircaseTimerBlock::decode(&block.encode()), Ok(block));
        assert_eq!(
            StaircaseTimerBlock::decode(&[1, 2, 3]),
            Err(BlockError::WrongSize)
        );
    }

    proptest! {
        #[test]
        fn prop_unit_never_overflows_field(text in "[a-zA-Z%/ ]{0,14}") {
            let block = MeasurementConfigBlock {
                unit_before_value: unit(&text),
                ..Default::default()
            };
            let decoded = MeasurementConfigBlock::decode(&block.encode()).unwrap();
            prop_assert_eq!(decoded.unit_before_value.as_str(), text.as_str());
        }
    }
}
