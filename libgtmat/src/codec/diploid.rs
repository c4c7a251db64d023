//! Nucleotide symbols <-> 4-bit allele codes, and packing of two codes into
//! one diploid byte. Stateless; every table is const.

use crate::error::CodecError;

pub const A_ALLELE: u8 = 0x0;
pub const C_ALLELE: u8 = 0x1;
pub const G_ALLELE: u8 = 0x2;
pub const T_ALLELE: u8 = 0x3;
pub const GAP_ALLELE: u8 = 0x4;
pub const INSERT_ALLELE: u8 = 0x5;
pub const UNKNOWN_ALLELE: u8 = 0xF;

/// Both nibbles unknown.
pub const UNKNOWN_DIPLOID: u8 = 0xFF;

/// Encode one genotype symbol to a 4-bit allele code.
///
/// Accepts nucleotides, gap, insertion, unknown markers, and the numeric
/// PLINK codes ('0' missing, '1'-'4' for A/C/G/T).
pub const fn encode_allele(symbol: u8) -> Result<u8, CodecError> {
    match symbol {
        b'A' | b'a' | b'1' => Ok(A_ALLELE),
        b'C' | b'c' | b'2' => Ok(C_ALLELE),
        b'G' | b'g' | b'3' => Ok(G_ALLELE),
        b'T' | b't' | b'4' => Ok(T_ALLELE),
        b'-' => Ok(GAP_ALLELE),
        b'+' => Ok(INSERT_ALLELE),
        b'N' | b'n' | b'.' | b'0' => Ok(UNKNOWN_ALLELE),
        _ => Err(CodecError::InvalidSymbol(symbol as char)),
    }
}

/// Pack two allele codes into one diploid byte. Total and pure; (a, b) and
/// (b, a) are distinct values (phased convention).
#[inline]
pub const fn pack(a: u8, b: u8) -> u8 {
    (a << 4) | (b & 0xF)
}

/// Pack with the smaller code in the high nibble, for callers holding
/// unphased calls.
#[inline]
pub const fn pack_unphased(a: u8, b: u8) -> u8 {
    if a <= b {
        pack(a, b)
    } else {
        pack(b, a)
    }
}

/// Decode one allele nibble back to its symbol. Total over the nibble
/// domain; unrecognized values decode to 'N'.
pub const fn decode_haplotype(code: u8) -> u8 {
    match code & 0xF {
        A_ALLELE => b'A',
        C_ALLELE => b'C',
        G_ALLELE => b'G',
        T_ALLELE => b'T',
        GAP_ALLELE => b'-',
        INSERT_ALLELE => b'+',
        _ => b'N',
    }
}

/// Split a diploid byte into its two allele codes.
#[inline]
pub const fn unpack(diploid: u8) -> (u8, u8) {
    (diploid >> 4, diploid & 0xF)
}

/// Decode a diploid byte to its two symbols. Total over the byte domain.
pub const fn decode_diploid(diploid: u8) -> (u8, u8) {
    let (a, b) = unpack(diploid);
    (decode_haplotype(a), decode_haplotype(b))
}

/// One-character HapMap codes: homozygotes are plain symbols, heterozygotes
/// use the IUPAC ambiguity letters.
pub const fn diploid_from_iupac(symbol: u8) -> Result<u8, CodecError> {
    match symbol {
        b'R' | b'r' => Ok(pack(A_ALLELE, G_ALLELE)),
        b'Y' | b'y' => Ok(pack(C_ALLELE, T_ALLELE)),
        b'S' | b's' => Ok(pack(C_ALLELE, G_ALLELE)),
        b'W' | b'w' => Ok(pack(A_ALLELE, T_ALLELE)),
        b'K' | b'k' => Ok(pack(G_ALLELE, T_ALLELE)),
        b'M' | b'm' => Ok(pack(A_ALLELE, C_ALLELE)),
        _ => match encode_allele(symbol) {
            Ok(code) => Ok(pack(code, code)),
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_pack_unpack_roundtrip() {
        // Every valid pair survives, including double-unknown.
        let codes = [
            A_ALLELE,
            C_ALLELE,
            G_ALLELE,
            T_ALLELE,
            GAP_ALLELE,
            INSERT_ALLELE,
            UNKNOWN_ALLELE,
        ];
        for &a in codes.iter() {
            for &b in codes.iter() {
                let (x, y) = unpack(pack(a, b));
                assert!(x == a);
                assert!(y == b);
            }
        }
        assert!(pack(UNKNOWN_ALLELE, UNKNOWN_ALLELE) == UNKNOWN_DIPLOID);
    }

    #[test]
    pub fn test_decode_is_total() {
        for byte in 0..=255u8 {
            let (a, b) = decode_diploid(byte);
            assert!(b"ACGT-+N".contains(&a));
            assert!(b"ACGT-+N".contains(&b));
        }
        // Unrecognized nibbles come back as unknown.
        assert!(decode_haplotype(0x9) == b'N');
    }

    #[test]
    pub fn test_encode_alphabet() {
        assert!(encode_allele(b'A') == Ok(A_ALLELE));
        assert!(encode_allele(b't') == Ok(T_ALLELE));
        assert!(encode_allele(b'+') == Ok(INSERT_ALLELE));
        assert!(encode_allele(b'0') == Ok(UNKNOWN_ALLELE));
        assert!(encode_allele(b'3') == Ok(G_ALLELE));
        assert!(encode_allele(b'Q') == Err(CodecError::InvalidSymbol('Q')));
    }

    #[test]
    pub fn test_iupac_heterozygotes() {
        assert!(diploid_from_iupac(b'R') == Ok(pack(A_ALLELE, G_ALLELE)));
        assert!(diploid_from_iupac(b'M') == Ok(pack(A_ALLELE, C_ALLELE)));
        assert!(diploid_from_iupac(b'A') == Ok(pack(A_ALLELE, A_ALLELE)));
        assert!(diploid_from_iupac(b'N') == Ok(UNKNOWN_DIPLOID));
        assert!(diploid_from_iupac(b'?').is_err());
    }

    #[test]
    pub fn test_unphased_canonicalization() {
        assert!(pack_unphased(T_ALLELE, A_ALLELE) == pack(A_ALLELE, T_ALLELE));
        assert!(pack_unphased(A_ALLELE, T_ALLELE) == pack(A_ALLELE, T_ALLELE));
    }
}
