use alloc::string::String;

use super::RegisterError;

/// Reinterpret one register as a two's-complement 16-bit value.
pub const fn int16(word: u16) -> i16 {
    word as i16
}

/// Combine two registers, high word first.
pub const fn uint32(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

/// Combine two registers, high word first, as a two's-complement value.
pub const fn int32(high: u16, low: u16) -> i32 {
    uint32(high, low) as i32
}

/// Unpack registers into ASCII text.
///
/// Each register holds two characters, high byte first. Bytes outside the
/// ASCII range are dropped and trailing NUL padding is trimmed, so this never
/// fails.
pub fn decode_string(words: &[u16]) -> String {
    let mut text: String = words
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .filter(u8::is_ascii)
        .map(char::from)
        .collect();
    let len = text.trim_end_matches('\0').len();
    text.truncate(len);
    text
}

/// Cursor over the words of one register map, in register order.
#[derive(Debug, Clone, Copy)]
pub struct WordReader<'a> {
    words: &'a [u16],
    pos: usize,
}

impl<'a> WordReader<'a> {
    /// Check the block length for `map` and start reading at its first word.
    pub fn new(map: &'static str, expected: usize, words: &'a [u16]) -> Result<Self, RegisterError> {
        if words.len() != expected {
            return Err(RegisterError::WordCount {
                map,
                expected,
                actual: words.len(),
            });
        }
        Ok(Self { words, pos: 0 })
    }

    // Length is checked once in `new`; maps read exactly what they declare.
    fn take(&mut self, count: usize) -> &'a [u16] {
        let end = (self.pos + count).min(self.words.len());
        let slice = &self.words[self.pos..end];
        self.pos = end;
        slice
    }

    pub fn u16(&mut self) -> u16 {
        self.take(1).first().copied().unwrap_or_default()
    }

    pub fn i16(&mut self) -> i16 {
        int16(self.u16())
    }

    pub fn u32(&mut self) -> u32 {
        let high = self.u16();
        let low = self.u16();
        uint32(high, low)
    }

    pub fn i32(&mut self) -> i32 {
        let high = self.u16();
        let low = self.u16();
        int32(high, low)
    }

    pub fn string(&mut self, count: usize) -> String {
        decode_string(self.take(count))
    }

    pub fn skip(&mut self, count: usize) {
        self.take(count);
    }

    /// Decode a 0/1 register as a flag.
    pub fn flag(&mut self, field: &'static str) -> Result<bool, RegisterError> {
        match self.u16() {
            0 => Ok(false),
            1 => Ok(true),
            code => Err(RegisterError::UnknownCode { field, code }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_string, int16, int32, uint32, WordReader};
    use crate::registers::RegisterError;

    #[test]
    fn int16_wraps_at_half_range() {
        assert_eq!(int16(0), 0);
        assert_eq!(int16(0xFFFF), -1);
        assert_eq!(int16(32767), 32767);
        assert_eq!(int16(32768), -32768);
    }

    #[test]
    fn thirty_two_bit_values_are_high_word_first() {
        assert_eq!(uint32(0x0001, 0x0000), 65536);
        assert_eq!(uint32(0x0000, 0x2329), 9001);
        assert_eq!(int32(0xFFFF, 0xFFFF), -1);
        assert_eq!(int32(0x8000, 0x0000), i32::MIN);
        assert_eq!(int32(0x7FFF, 0xFFFF), i32::MAX);
    }

    #[test]
    fn strings_trim_trailing_nul() {
        assert_eq!(decode_string(&[0x4142, 0x4300]), "ABC");
        assert_eq!(decode_string(&[0x4131]), "A1");
        assert_eq!(decode_string(&[0x0000, 0x0000]), "");
    }

    #[test]
    fn strings_drop_non_ascii_bytes() {
        assert_eq!(decode_string(&[0x41FF, 0xC342]), "AB");
    }

    #[test]
    fn interior_nul_is_kept() {
        assert_eq!(decode_string(&[0x4100, 0x4200]), "A\0B");
    }

    #[test]
    fn reader_checks_block_length() {
        let err = WordReader::new("State", 7, &[0; 6]).unwrap_err();
        assert_eq!(
            err,
            RegisterError::WordCount {
                map: "State",
                expected: 7,
                actual: 6,
            }
        );
    }

    #[test]
    fn reader_walks_mixed_fields() {
        let words = [0xFFFE, 0x0000, 0x0010, 0x4F4B, 0x0001];
        let mut r = WordReader::new("test", words.len(), &words).unwrap();
        assert_eq!(r.i16(), -2);
        assert_eq!(r.u32(), 16);
        assert_eq!(r.string(1), "OK");
        assert!(r.flag("contactor").unwrap());
    }

    #[test]
    fn flags_reject_other_codes() {
        let mut r = WordReader::new("test", 1, &[2]).unwrap();
        assert_eq!(
            r.flag("contactor").unwrap_err(),
            RegisterError::UnknownCode {
                field: "contactor",
                code: 2,
            }
        );
    }
}
