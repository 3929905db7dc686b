use crate::error::DecodeError;

/// PCM sample formats, with their wire codes.
///
/// Samples are packed and interleaved; endianness is part of the format.
/// The legacy codec entries (MuLaw and later) have no fixed sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PcmFormat {
    S8 = 0,
    U8 = 1,
    S16Le = 2,
    S16Be = 3,
    U16Le = 4,
    U16Be = 5,
    S24Le = 6,
    S24Be = 7,
    U24Le = 8,
    U24Be = 9,
    S32Le = 10,
    S32Be = 11,
    U32Le = 12,
    U32Be = 13,
    F32Le = 14,
    F32Be = 15,
    F64Le = 16,
    F64Be = 17,
    Iec958SubframeLe = 18,
    Iec958SubframeBe = 19,
    MuLaw = 20,
    ALaw = 21,
    ImaAdpcm = 22,
    Mpeg = 23,
    Gsm = 24,
    /// Any other unspecified format.
    Special = 31,
}

impl PcmFormat {
    pub fn from_wire(code: u8) -> Result<Self, DecodeError> {
        use PcmFormat::*;
        Ok(match code {
            0 => S8,
            1 => U8,
            2 => S16Le,
            3 => S16Be,
            4 => U16Le,
            5 => U16Be,
            6 => S24Le,
            7 => S24Be,
            8 => U24Le,
            9 => U24Be,
            10 => S32Le,
            11 => S32Be,
            12 => U32Le,
            13 => U32Be,
            14 => F32Le,
            15 => F32Be,
            16 => F64Le,
            17 => F64Be,
            18 => Iec958SubframeLe,
            19 => Iec958SubframeBe,
            20 => MuLaw,
            21 => ALaw,
            22 => ImaAdpcm,
            23 => Mpeg,
            24 => Gsm,
            31 => Special,
            other => return Err(DecodeError::UnknownFormat(other)),
        })
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Size of one sample in bytes, if the format has a fixed size.
    pub fn sample_size(self) -> Option<usize> {
        use PcmFormat::*;
        match self {
            S8 | U8 => Some(1),
            S16Le | S16Be | U16Le | U16Be => Some(2),
            S24Le | S24Be | U24Le | U24Be => Some(3),
            S32Le | S32Be | U32Le | U32Be | F32Le | F32Be => Some(4),
            F64Le | F64Be => Some(8),
            Iec958SubframeLe | Iec958SubframeBe => Some(4),
            MuLaw | ALaw | ImaAdpcm | Mpeg | Gsm | Special => None,
        }
    }

    pub fn is_signed(self) -> bool {
        use PcmFormat::*;
        matches!(
            self,
            S8 | S16Le | S16Be | S24Le | S24Be | S32Le | S32Be
        ) || self.is_float()
    }

    pub fn is_float(self) -> bool {
        use PcmFormat::*;
        matches!(self, F32Le | F32Be | F64Le | F64Be)
    }

    /// Token used for this format in negotiation lists, e.g. "s16_le".
    pub fn as_str(self) -> &'static str {
        use PcmFormat::*;
        match self {
            S8 => "s8",
            U8 => "u8",
            S16Le => "s16_le",
            S16Be => "s16_be",
            U16Le => "u16_le",
            U16Be => "u16_be",
            S24Le => "s24_le",
            S24Be => "s24_be",
            U24Le => "u24_le",
            U24Be => "u24_be",
            S32Le => "s32_le",
            S32Be => "s32_be",
            U32Le => "u32_le",
            U32Be => "u32_be",
            F32Le => "float_le",
            F32Be => "float_be",
            F64Le => "float64_le",
            F64Be => "float64_be",
            Iec958SubframeLe => "iec958_subframe_le",
            Iec958SubframeBe => "iec958_subframe_be",
            MuLaw => "mu_law",
            ALaw => "a_law",
            ImaAdpcm => "ima_adpcm",
            Mpeg => "mpeg",
            Gsm => "gsm",
            Special => "special",
        }
    }
}

impl std::fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PcmFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PcmFormat::*;
        Ok(match s {
            "s8" => S8,
            "u8" => U8,
            "s16_le" => S16Le,
            "s16_be" => S16Be,
            "u16_le" => U16Le,
            "u16_be" => U16Be,
            "s24_le" => S24Le,
            "s24_be" => S24Be,
            "u24_le" => U24Le,
            "u24_be" => U24Be,
            "s32_le" => S32Le,
            "s32_be" => S32Be,
            "u32_le" => U32Le,
            "u32_be" => U32Be,
            "float_le" => F32Le,
            "float_be" => F32Be,
            "float64_le" => F64Le,
            "float64_be" => F64Be,
            "iec958_subframe_le" => Iec958SubframeLe,
            "iec958_subframe_be" => Iec958SubframeBe,
            "mu_law" => MuLaw,
            "a_law" => ALaw,
            "ima_adpcm" => ImaAdpcm,
            "mpeg" => Mpeg,
            "gsm" => Gsm,
            "special" => Special,
            _ => return Err(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        for code in (0..=24).chain([31]) {
            let f = PcmFormat::from_wire(code).unwrap();
            assert_eq!(f.to_wire(), code);
        }
        assert!(PcmFormat::from_wire(25).is_err());
        assert!(PcmFormat::from_wire(30).is_err());
    }

    #[test]
    fn tokens_round_trip() {
        for code in (0..=24).chain([31]) {
            let f = PcmFormat::from_wire(code).unwrap();
            assert_eq!(f.as_str().parse::<PcmFormat>(), Ok(f));
        }
        assert!("s16le".parse::<PcmFormat>().is_err());
    }

    #[test]
    fn sample_sizes() {
        assert_eq!(PcmFormat::S16Le.sample_size(), Some(2));
        assert_eq!(PcmFormat::F32Le.sample_size(), Some(4));
        assert_eq!(PcmFormat::Gsm.sample_size(), None);
        assert!(PcmFormat::F64Be.is_float());
        assert!(PcmFormat::S8.is_signed());
        assert!(!PcmFormat::U32Le.is_signed());
    }
}
