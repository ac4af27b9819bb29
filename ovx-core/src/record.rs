//! Fixed-width overlap records.
//!
//! An overlap is packed into three little-endian u64 words plus the two read
//! ids. Read-length fields are 21 bits (reads up to 2,097,151 bases) and the
//! error rate is a 12-bit fixed-point value with 0.01% resolution. All
//! packing is explicit shift/mask; accessors are pure functions of the bit
//! pattern.
//!
//! Word layout:
//! - word0: ahg5:21 | ahg3:21 | evalue:12 | flipped:1 | forOBT:1 | forDUP:1 | forUTG:1
//! - word1: bhg5:21 | bhg3:21 | span:21
//! - word2: alignSwapped:1 | alignFile:19 | alignPos:44

use crate::reads::ReadStore;
use std::cmp::Ordering;
use thiserror::Error;

/// Width of the read-length fields. A store records the width it was built
/// with; readers refuse stores built with a different width.
pub const MAX_READLEN_BITS: u32 = 21;

/// Largest representable read length, hang, or span.
pub const MAX_READLEN: u32 = (1 << MAX_READLEN_BITS) - 1;

/// Width of the quantized error field.
pub const MAX_EVALUE_BITS: u32 = 12;

/// Largest encoded error value.
pub const MAX_EVALUE: u16 = (1 << MAX_EVALUE_BITS) - 1;

/// Largest representable fraction error (40.95%).
pub const MAX_ERATE: f64 = MAX_EVALUE as f64 / 10000.0;

/// Packed words per record.
pub const WORDS_PER_OVERLAP: usize = 3;

const ALIGN_FILE_BITS: u32 = 19;
const ALIGN_POS_BITS: u32 = 44;

/// Quantize a fraction error to the 12-bit fixed-point encoding. Values at
/// or above the representable maximum clamp to [`MAX_EVALUE`].
pub fn encode_evalue(erate: f64) -> u16 {
    if erate <= 0.0 {
        0
    } else if erate < MAX_ERATE {
        (10000.0 * erate + 0.5) as u16
    } else {
        MAX_EVALUE
    }
}

/// De-quantize an encoded error value back to a fraction error.
pub fn decode_evalue(evalue: u16) -> f64 {
    evalue as f64 / 10000.0
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("overlap field {field} value {value} exceeds {bits}-bit width")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        bits: u32,
    },
}

/// How [`Overlap::format`] renders a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFormat {
    /// a-hang / b-hang form.
    Hangs,
    /// Begin/end coordinates on each read.
    Coords,
    /// All four raw hangs plus span and flags.
    Raw,
    /// PAF, suitable for miniasm-style consumers.
    Paf,
}

/// One overlap between reads `a` and `b`, packed for storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Overlap {
    pub a_id: u32,
    pub b_id: u32,
    dat: [u64; WORDS_PER_OVERLAP],
}

#[inline]
fn get_bits(word: u64, shift: u32, bits: u32) -> u64 {
    (word >> shift) & ((1u64 << bits) - 1)
}

#[inline]
fn put_bits(word: u64, shift: u32, bits: u32, value: u64) -> u64 {
    let mask = ((1u64 << bits) - 1) << shift;
    (word & !mask) | ((value << shift) & mask)
}

impl Overlap {
    pub fn new(a_id: u32, b_id: u32) -> Self {
        Self {
            a_id,
            b_id,
            dat: [0; WORDS_PER_OVERLAP],
        }
    }

    fn check(field: &'static str, value: u64, bits: u32) -> Result<u64, RecordError> {
        if value >= (1u64 << bits) {
            Err(RecordError::FieldOverflow { field, value, bits })
        } else {
            Ok(value)
        }
    }

    // -- raw hang fields ---------------------------------------------------

    pub fn ahg5(&self) -> u32 {
        get_bits(self.dat[0], 0, MAX_READLEN_BITS) as u32
    }

    pub fn ahg3(&self) -> u32 {
        get_bits(self.dat[0], MAX_READLEN_BITS, MAX_READLEN_BITS) as u32
    }

    pub fn bhg5(&self) -> u32 {
        get_bits(self.dat[1], 0, MAX_READLEN_BITS) as u32
    }

    pub fn bhg3(&self) -> u32 {
        get_bits(self.dat[1], MAX_READLEN_BITS, MAX_READLEN_BITS) as u32
    }

    pub fn set_ahg5(&mut self, v: u32) -> Result<(), RecordError> {
        let v = Self::check("ahg5", v as u64, MAX_READLEN_BITS)?;
        self.dat[0] = put_bits(self.dat[0], 0, MAX_READLEN_BITS, v);
        Ok(())
    }

    pub fn set_ahg3(&mut self, v: u32) -> Result<(), RecordError> {
        let v = Self::check("ahg3", v as u64, MAX_READLEN_BITS)?;
        self.dat[0] = put_bits(self.dat[0], MAX_READLEN_BITS, MAX_READLEN_BITS, v);
        Ok(())
    }

    pub fn set_bhg5(&mut self, v: u32) -> Result<(), RecordError> {
        let v = Self::check("bhg5", v as u64, MAX_READLEN_BITS)?;
        self.dat[1] = put_bits(self.dat[1], 0, MAX_READLEN_BITS, v);
        Ok(())
    }

    pub fn set_bhg3(&mut self, v: u32) -> Result<(), RecordError> {
        let v = Self::check("bhg3", v as u64, MAX_READLEN_BITS)?;
        self.dat[1] = put_bits(self.dat[1], MAX_READLEN_BITS, MAX_READLEN_BITS, v);
        Ok(())
    }

    // -- derived hangs -----------------------------------------------------

    /// `ahg5 - bhg5`. At most one of the two raw fields is nonzero for
    /// dovetail and containment overlaps.
    pub fn a_hang(&self) -> i32 {
        self.ahg5() as i32 - self.bhg5() as i32
    }

    /// `bhg3 - ahg3`.
    pub fn b_hang(&self) -> i32 {
        self.bhg3() as i32 - self.ahg3() as i32
    }

    /// Set the 5' hang pair from a signed a-hang, zeroing the unused field.
    pub fn set_a_hang(&mut self, a: i32) -> Result<(), RecordError> {
        if a < 0 {
            self.set_ahg5(0)?;
            self.set_bhg5(a.unsigned_abs())
        } else {
            self.set_bhg5(0)?;
            self.set_ahg5(a as u32)
        }
    }

    /// Set the 3' hang pair from a signed b-hang, zeroing the unused field.
    pub fn set_b_hang(&mut self, b: i32) -> Result<(), RecordError> {
        if b < 0 {
            self.set_bhg3(0)?;
            self.set_ahg3(b.unsigned_abs())
        } else {
            self.set_ahg3(0)?;
            self.set_bhg3(b as u32)
        }
    }

    // -- span, error, flags ------------------------------------------------

    pub fn span(&self) -> u32 {
        get_bits(self.dat[1], 2 * MAX_READLEN_BITS, MAX_READLEN_BITS) as u32
    }

    pub fn set_span(&mut self, v: u32) -> Result<(), RecordError> {
        let v = Self::check("span", v as u64, MAX_READLEN_BITS)?;
        self.dat[1] = put_bits(self.dat[1], 2 * MAX_READLEN_BITS, MAX_READLEN_BITS, v);
        Ok(())
    }

    pub fn evalue(&self) -> u16 {
        get_bits(self.dat[0], 2 * MAX_READLEN_BITS, MAX_EVALUE_BITS) as u16
    }

    pub fn set_evalue(&mut self, v: u16) -> Result<(), RecordError> {
        let v = Self::check("evalue", v as u64, MAX_EVALUE_BITS)?;
        self.dat[0] = put_bits(self.dat[0], 2 * MAX_READLEN_BITS, MAX_EVALUE_BITS, v);
        Ok(())
    }

    pub fn erate(&self) -> f64 {
        decode_evalue(self.evalue())
    }

    /// Quantizes and clamps; never fails.
    pub fn set_erate(&mut self, e: f64) {
        self.dat[0] = put_bits(
            self.dat[0],
            2 * MAX_READLEN_BITS,
            MAX_EVALUE_BITS,
            encode_evalue(e) as u64,
        );
    }

    fn flag(&self, bit: u32) -> bool {
        get_bits(self.dat[0], bit, 1) != 0
    }

    fn set_flag(&mut self, bit: u32, v: bool) {
        self.dat[0] = put_bits(self.dat[0], bit, 1, v as u64);
    }

    pub fn flipped(&self) -> bool {
        self.flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS)
    }

    pub fn set_flipped(&mut self, v: bool) {
        self.set_flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS, v)
    }

    pub fn for_obt(&self) -> bool {
        self.flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS + 1)
    }

    pub fn set_for_obt(&mut self, v: bool) {
        self.set_flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS + 1, v)
    }

    pub fn for_dup(&self) -> bool {
        self.flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS + 2)
    }

    pub fn set_for_dup(&mut self, v: bool) {
        self.set_flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS + 2, v)
    }

    pub fn for_utg(&self) -> bool {
        self.flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS + 3)
    }

    pub fn set_for_utg(&mut self, v: bool) {
        self.set_flag(2 * MAX_READLEN_BITS + MAX_EVALUE_BITS + 3, v)
    }

    // -- alignment back-reference ------------------------------------------

    /// `(file, position)` of the full base-level alignment, if one was
    /// recorded. File index 0 means no alignment.
    pub fn align_ref(&self) -> Option<(u32, u64)> {
        let file = get_bits(self.dat[2], 1, ALIGN_FILE_BITS) as u32;
        if file == 0 {
            None
        } else {
            Some((file, get_bits(self.dat[2], 1 + ALIGN_FILE_BITS, ALIGN_POS_BITS)))
        }
    }

    pub fn set_align_ref(&mut self, file: u32, pos: u64) -> Result<(), RecordError> {
        let file = Self::check("alignFile", file as u64, ALIGN_FILE_BITS)?;
        let pos = Self::check("alignPos", pos, ALIGN_POS_BITS)?;
        self.dat[2] = put_bits(self.dat[2], 1, ALIGN_FILE_BITS, file);
        self.dat[2] = put_bits(self.dat[2], 1 + ALIGN_FILE_BITS, ALIGN_POS_BITS, pos);
        Ok(())
    }

    /// True when our ids are swapped relative to the referenced alignment.
    pub fn align_swapped(&self) -> bool {
        get_bits(self.dat[2], 0, 1) != 0
    }

    pub fn set_align_swapped(&mut self, v: bool) {
        self.dat[2] = put_bits(self.dat[2], 0, 1, v as u64);
    }

    // -- geometry ----------------------------------------------------------

    /// Dovetail if a 5' hang of either read is zero and a 3' hang of either
    /// read is zero; covers containment as a special case.
    pub fn is_dovetail(&self) -> bool {
        (self.ahg5() == 0 || self.bhg5() == 0) && (self.ahg3() == 0 || self.bhg3() == 0)
    }

    pub fn is_partial_5prime(&self) -> bool {
        self.ahg5() > 0 && self.bhg5() > 0
    }

    pub fn is_partial_3prime(&self) -> bool {
        self.ahg3() > 0 && self.bhg3() > 0
    }

    pub fn is_partial(&self) -> bool {
        self.is_partial_5prime() || self.is_partial_3prime()
    }

    pub fn a_is_contained(&self) -> bool {
        self.ahg5() == 0 && self.ahg3() == 0
    }

    pub fn a_is_container(&self) -> bool {
        self.bhg5() == 0 && self.bhg3() == 0
    }

    pub fn b_is_contained(&self) -> bool {
        self.a_is_container()
    }

    pub fn b_is_container(&self) -> bool {
        self.a_is_contained()
    }

    /// The overlap hangs off a's 5' end. Valid for dovetail overlaps only.
    pub fn a_end_is_5prime(&self) -> bool {
        self.bhg5() > 0 && self.ahg3() > 0
    }

    /// The overlap hangs off a's 3' end. Valid for dovetail overlaps only.
    pub fn a_end_is_3prime(&self) -> bool {
        self.ahg5() > 0 && self.bhg3() > 0
    }

    pub fn b_end_is_5prime(&self) -> bool {
        (self.a_end_is_5prime() && self.flipped()) || (self.a_end_is_3prime() && !self.flipped())
    }

    pub fn b_end_is_3prime(&self) -> bool {
        (self.a_end_is_5prime() && !self.flipped()) || (self.a_end_is_3prime() && self.flipped())
    }

    // -- read coordinates --------------------------------------------------

    pub fn a_bgn(&self) -> u32 {
        self.ahg5()
    }

    pub fn a_end(&self, reads: &dyn ReadStore) -> u32 {
        reads.read_length(self.a_id) - self.ahg3()
    }

    /// Begin coordinate on b. For flipped overlaps the coordinates are in
    /// the reverse-complemented sequence, reported as bgn > end.
    pub fn b_bgn(&self, reads: &dyn ReadStore) -> u32 {
        if self.flipped() {
            reads.read_length(self.b_id) - self.bhg5()
        } else {
            self.bhg5()
        }
    }

    pub fn b_end(&self, reads: &dyn ReadStore) -> u32 {
        if self.flipped() {
            self.bhg3()
        } else {
            reads.read_length(self.b_id) - self.bhg3()
        }
    }

    // -- symmetric record --------------------------------------------------

    /// The same overlap seen from b's perspective: ids exchanged, hangs
    /// remapped (crosswise when flipped), flags and span preserved, and the
    /// alignment back-reference marked swapped.
    pub fn swap_ids(&self) -> Overlap {
        let mut out = *self;
        out.a_id = self.b_id;
        out.b_id = self.a_id;

        let (ahg5, ahg3, bhg5, bhg3) = if self.flipped() {
            (self.bhg3(), self.bhg5(), self.ahg3(), self.ahg5())
        } else {
            (self.bhg5(), self.bhg3(), self.ahg5(), self.ahg3())
        };

        // Widths already validated in self.
        out.set_ahg5(ahg5).unwrap();
        out.set_ahg3(ahg3).unwrap();
        out.set_bhg5(bhg5).unwrap();
        out.set_bhg3(bhg3).unwrap();

        if self.align_ref().is_some() {
            out.set_align_swapped(!self.align_swapped());
        }

        out
    }

    // -- wire form ---------------------------------------------------------

    pub(crate) fn words(&self) -> [u64; WORDS_PER_OVERLAP] {
        self.dat
    }

    pub(crate) fn set_words(&mut self, words: [u64; WORDS_PER_OVERLAP]) {
        self.dat = words;
    }

    // -- formatting --------------------------------------------------------

    pub fn format(&self, format: DisplayFormat, reads: &dyn ReadStore) -> String {
        match format {
            DisplayFormat::Hangs => format!(
                "{:>10} {:>10}  {}  {:>7} {:>7}  {:6.4}",
                self.a_id,
                self.b_id,
                if self.flipped() { 'I' } else { 'N' },
                self.a_hang(),
                self.b_hang(),
                self.erate(),
            ),
            DisplayFormat::Coords => format!(
                "{:>10} {:>10}  {}  {:>7} {:>7}  {:>7} {:>7}  {:6.4}",
                self.a_id,
                self.b_id,
                if self.flipped() { 'I' } else { 'N' },
                self.a_bgn(),
                self.a_end(reads),
                self.b_bgn(reads),
                self.b_end(reads),
                self.erate(),
            ),
            DisplayFormat::Raw => format!(
                "{:>10} {:>10}  {}  {:>7} {:>7} {:>7} {:>7}  {:>7}  {:6.4}  {}{}{}",
                self.a_id,
                self.b_id,
                if self.flipped() { 'I' } else { 'N' },
                self.ahg5(),
                self.ahg3(),
                self.bhg5(),
                self.bhg3(),
                self.span(),
                self.erate(),
                if self.for_obt() { 'T' } else { '-' },
                if self.for_dup() { 'D' } else { '-' },
                if self.for_utg() { 'U' } else { '-' },
            ),
            DisplayFormat::Paf => {
                let b_bgn = self.b_bgn(reads);
                let b_end = self.b_end(reads);
                let matches = (self.span() as f64 * (1.0 - self.erate())) as u32;
                format!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t255",
                    self.a_id,
                    reads.read_length(self.a_id),
                    self.a_bgn(),
                    self.a_end(reads),
                    if self.flipped() { '-' } else { '+' },
                    self.b_id,
                    reads.read_length(self.b_id),
                    b_bgn.min(b_end),
                    b_bgn.max(b_end),
                    matches,
                    self.span(),
                )
            }
        }
    }
}

/// Total order the store sort depends on: `(a_id, b_id, raw bit pattern)`.
impl Ord for Overlap {
    fn cmp(&self, other: &Self) -> Ordering {
        self.a_id
            .cmp(&other.a_id)
            .then(self.b_id.cmp(&other.b_id))
            .then(self.dat.cmp(&other.dat))
    }
}

impl PartialOrd for Overlap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reads::ReadIndex;

    fn two_reads(a_len: u32, b_len: u32) -> ReadIndex {
        let mut reads = ReadIndex::new();
        reads.add_read(a_len, 1);
        reads.add_read(b_len, 1);
        reads
    }

    #[test]
    fn test_field_roundtrip() {
        let mut ov = Overlap::new(7, 9);
        ov.set_ahg5(100).unwrap();
        ov.set_ahg3(0).unwrap();
        ov.set_bhg5(0).unwrap();
        ov.set_bhg3(250).unwrap();
        ov.set_span(1400).unwrap();
        ov.set_evalue(123).unwrap();
        ov.set_flipped(true);
        ov.set_for_obt(true);
        ov.set_for_utg(true);

        assert_eq!(ov.ahg5(), 100);
        assert_eq!(ov.ahg3(), 0);
        assert_eq!(ov.bhg5(), 0);
        assert_eq!(ov.bhg3(), 250);
        assert_eq!(ov.span(), 1400);
        assert_eq!(ov.evalue(), 123);
        assert!(ov.flipped());
        assert!(ov.for_obt());
        assert!(!ov.for_dup());
        assert!(ov.for_utg());
        assert_eq!(ov.a_hang(), 100);
        assert_eq!(ov.b_hang(), 250);
    }

    #[test]
    fn test_max_field_values() {
        let mut ov = Overlap::new(1, 2);
        ov.set_ahg5(MAX_READLEN).unwrap();
        ov.set_span(MAX_READLEN).unwrap();
        ov.set_evalue(MAX_EVALUE).unwrap();
        assert_eq!(ov.ahg5(), MAX_READLEN);
        assert_eq!(ov.span(), MAX_READLEN);
        assert_eq!(ov.evalue(), MAX_EVALUE);
    }

    #[test]
    fn test_field_overflow_rejected() {
        let mut ov = Overlap::new(1, 2);
        assert!(ov.set_ahg5(MAX_READLEN + 1).is_err());
        assert!(ov.set_span(1 << MAX_READLEN_BITS).is_err());
        assert!(ov.set_evalue(MAX_EVALUE + 1).is_err());
    }

    #[test]
    fn test_signed_hang_setters() {
        let mut ov = Overlap::new(1, 2);
        ov.set_a_hang(75).unwrap();
        assert_eq!((ov.ahg5(), ov.bhg5()), (75, 0));
        ov.set_a_hang(-40).unwrap();
        assert_eq!((ov.ahg5(), ov.bhg5()), (0, 40));
        ov.set_b_hang(60).unwrap();
        assert_eq!((ov.ahg3(), ov.bhg3()), (0, 60));
        ov.set_b_hang(-15).unwrap();
        assert_eq!((ov.ahg3(), ov.bhg3()), (15, 0));
        assert_eq!(ov.a_hang(), -40);
        assert_eq!(ov.b_hang(), -15);
    }

    #[test]
    fn test_evalue_quantization() {
        assert_eq!(encode_evalue(0.0), 0);
        assert_eq!(encode_evalue(0.015), 150);
        assert_eq!(encode_evalue(0.5), MAX_EVALUE);
        assert_eq!(encode_evalue(MAX_ERATE), MAX_EVALUE);

        // Monotonic, and round-trips within the declared resolution.
        let mut prev = 0;
        let mut e = 0.0;
        while e < MAX_ERATE {
            let enc = encode_evalue(e);
            assert!(enc >= prev);
            assert!((decode_evalue(enc) - e).abs() <= 0.0001);
            prev = enc;
            e += 0.00037;
        }
    }

    #[test]
    fn test_erate_clamps() {
        let mut ov = Overlap::new(1, 2);
        ov.set_erate(2.0);
        assert_eq!(ov.evalue(), MAX_EVALUE);
        ov.set_erate(-0.5);
        assert_eq!(ov.evalue(), 0);
        ov.set_erate(0.0213);
        assert!((ov.erate() - 0.0213).abs() < 1e-9);
    }

    #[test]
    fn test_geometry_predicates() {
        // a3' dovetails into b5'.
        let mut ov = Overlap::new(1, 2);
        ov.set_ahg5(200).unwrap();
        ov.set_bhg3(300).unwrap();
        assert!(ov.is_dovetail());
        assert!(!ov.is_partial());
        assert!(ov.a_end_is_3prime());
        assert!(!ov.a_end_is_5prime());
        assert!(ov.b_end_is_5prime());

        // b contained in a.
        let mut cont = Overlap::new(1, 2);
        cont.set_ahg5(50).unwrap();
        cont.set_ahg3(60).unwrap();
        assert!(cont.is_dovetail());
        assert!(cont.b_is_contained());
        assert!(cont.a_is_container());
        assert!(!cont.a_is_contained());

        // Partial: both 5' hangs positive.
        let mut part = Overlap::new(1, 2);
        part.set_ahg5(10).unwrap();
        part.set_bhg5(10).unwrap();
        assert!(part.is_partial_5prime());
        assert!(part.is_partial());
        assert!(!part.is_dovetail());
    }

    #[test]
    fn test_coordinates() {
        let reads = two_reads(1000, 800);

        let mut ov = Overlap::new(1, 2);
        ov.set_ahg5(200).unwrap();
        ov.set_bhg3(100).unwrap();
        assert_eq!(ov.a_bgn(), 200);
        assert_eq!(ov.a_end(&reads), 1000);
        assert_eq!(ov.b_bgn(&reads), 0);
        assert_eq!(ov.b_end(&reads), 700);

        ov.set_flipped(true);
        assert_eq!(ov.b_bgn(&reads), 800);
        assert_eq!(ov.b_end(&reads), 100);
    }

    #[test]
    fn test_swap_ids_normal() {
        let mut ov = Overlap::new(1, 2);
        ov.set_ahg5(200).unwrap();
        ov.set_bhg3(100).unwrap();
        ov.set_span(750).unwrap();
        ov.set_erate(0.01);
        ov.set_for_utg(true);

        let sw = ov.swap_ids();
        assert_eq!((sw.a_id, sw.b_id), (2, 1));
        assert_eq!(sw.ahg5(), 0);
        assert_eq!(sw.ahg3(), 100);
        assert_eq!(sw.bhg5(), 200);
        assert_eq!(sw.bhg3(), 0);
        assert_eq!(sw.span(), 750);
        assert_eq!(sw.evalue(), ov.evalue());
        assert!(sw.for_utg());
        assert!(!sw.flipped());
    }

    #[test]
    fn test_swap_ids_flipped() {
        let mut ov = Overlap::new(1, 2);
        ov.set_ahg5(200).unwrap();
        ov.set_ahg3(0).unwrap();
        ov.set_bhg5(0).unwrap();
        ov.set_bhg3(100).unwrap();
        ov.set_flipped(true);

        let sw = ov.swap_ids();
        assert_eq!(sw.ahg5(), 100);
        assert_eq!(sw.ahg3(), 0);
        assert_eq!(sw.bhg5(), 0);
        assert_eq!(sw.bhg3(), 200);
        assert!(sw.flipped());

        // Swapping twice restores the original geometry.
        let back = sw.swap_ids();
        assert_eq!(back, ov);
    }

    #[test]
    fn test_align_ref() {
        let mut ov = Overlap::new(1, 2);
        assert_eq!(ov.align_ref(), None);
        ov.set_align_ref(3, 1 << 40).unwrap();
        assert_eq!(ov.align_ref(), Some((3, 1 << 40)));
        assert!(ov.set_align_ref(1 << ALIGN_FILE_BITS, 0).is_err());
    }

    #[test]
    fn test_total_order() {
        let mut a = Overlap::new(1, 5);
        let mut b = Overlap::new(1, 5);
        a.set_evalue(10).unwrap();
        b.set_evalue(20).unwrap();

        assert!(Overlap::new(1, 2) < Overlap::new(1, 3));
        assert!(Overlap::new(1, 9) < Overlap::new(2, 1));
        assert!(a < b);

        let mut v = vec![b, Overlap::new(2, 1), a, Overlap::new(1, 2)];
        v.sort();
        assert_eq!(v[0], Overlap::new(1, 2));
        assert_eq!(v[1], a);
        assert_eq!(v[2], b);
        assert_eq!(v[3], Overlap::new(2, 1));
    }

    #[test]
    fn test_paf_format() {
        let reads = two_reads(1000, 800);
        let mut ov = Overlap::new(1, 2);
        ov.set_ahg5(200).unwrap();
        ov.set_bhg3(100).unwrap();
        ov.set_span(700).unwrap();
        ov.set_erate(0.02);

        let line = ov.format(DisplayFormat::Paf, &reads);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 12);
        assert_eq!(fields[0], "1");
        assert_eq!(fields[1], "1000");
        assert_eq!(fields[4], "+");
        assert_eq!(fields[6], "800");
        assert_eq!(fields[10], "700");
    }
}
