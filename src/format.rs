// format.rs — channel formats, argument kinds and kernel type hints.
//
// A pipeline argument is described by three things: what kind of memory object
// it is (`ArgKind`), how each element is stored (`ChannelType` × channel count)
// and how big it is (see `size.rs`). This module owns the first two plus the
// typed view of what a kernel *expects* to find in a parameter:
//
//   TypeDescriptor { domain, width, channels }
//
// Two producers fill a descriptor:
//   1. reflection of the parameter's declared device type
//      (e.g. `texture_storage_2d<rgba8unorm, write>` → Float/UnsignedNorm/4)
//   2. the optional type-hint suffix of the parameter's identifier
//      (e.g. `dst_fu4n` → Float/UnsignedNorm/4, fresh output)
//
// Both are checked against the argument's declared `ChannelFormat` by the
// same table, so comparisons happen on data rather than on strings.
//
// HINT GRAMMAR:
//   suffix after the last '_' of the identifier, 3 or 4 characters
//     [0] read domain   u (unsigned int) | i (signed int) | f (float) | h (half)
//     [1] width         c | s | i           for u/i   (8/16/32-bit)
//                       u | s | f           for f/h   (unorm/snorm/full range)
//     [2] channels      1..4
//     [3] optional 'n'  output is freshly created by this stage

use std::fmt;
use std::ops::RangeInclusive;

// ============================================================
// Channel types
// ============================================================

/// Per-channel storage type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    SnormInt8,
    SnormInt16,
    UnormInt8,
    UnormInt16,
    UnormShort565,
    UnormShort555,
    UnormInt101010,
    SignedInt8,
    SignedInt16,
    SignedInt32,
    UnsignedInt8,
    UnsignedInt16,
    UnsignedInt32,
    HalfFloat,
    Float,
    UnormInt101010_2,
}

impl ChannelType {
    pub const ALL: [ChannelType; 16] = [
        ChannelType::SnormInt8,
        ChannelType::SnormInt16,
        ChannelType::UnormInt8,
        ChannelType::UnormInt16,
        ChannelType::UnormShort565,
        ChannelType::UnormShort555,
        ChannelType::UnormInt101010,
        ChannelType::SignedInt8,
        ChannelType::SignedInt16,
        ChannelType::SignedInt32,
        ChannelType::UnsignedInt8,
        ChannelType::UnsignedInt16,
        ChannelType::UnsignedInt32,
        ChannelType::HalfFloat,
        ChannelType::Float,
        ChannelType::UnormInt101010_2,
    ];

    /// Manifest spelling.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelType::SnormInt8 => "SNORM_INT8",
            ChannelType::SnormInt16 => "SNORM_INT16",
            ChannelType::UnormInt8 => "UNORM_INT8",
            ChannelType::UnormInt16 => "UNORM_INT16",
            ChannelType::UnormShort565 => "UNORM_SHORT_565",
            ChannelType::UnormShort555 => "UNORM_SHORT_555",
            ChannelType::UnormInt101010 => "UNORM_INT_101010",
            ChannelType::SignedInt8 => "SIGNED_INT8",
            ChannelType::SignedInt16 => "SIGNED_INT16",
            ChannelType::SignedInt32 => "SIGNED_INT32",
            ChannelType::UnsignedInt8 => "UNSIGNED_INT8",
            ChannelType::UnsignedInt16 => "UNSIGNED_INT16",
            ChannelType::UnsignedInt32 => "UNSIGNED_INT32",
            ChannelType::HalfFloat => "HALF_FLOAT",
            ChannelType::Float => "FLOAT",
            ChannelType::UnormInt101010_2 => "UNORM_INT_101010_2",
        }
    }

    /// Exact, case-sensitive lookup by manifest spelling.
    pub fn from_name(name: &str) -> Option<ChannelType> {
        ChannelType::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Several channels share one machine word.
    pub fn is_packed(&self) -> bool {
        matches!(
            self,
            ChannelType::UnormShort565
                | ChannelType::UnormShort555
                | ChannelType::UnormInt101010
                | ChannelType::UnormInt101010_2
        )
    }

    /// Bytes of one channel for unpacked types, bytes of a whole element for
    /// packed ones.
    pub fn unit_bytes(&self) -> usize {
        match self {
            ChannelType::SnormInt8
            | ChannelType::UnormInt8
            | ChannelType::SignedInt8
            | ChannelType::UnsignedInt8 => 1,
            ChannelType::SnormInt16
            | ChannelType::UnormInt16
            | ChannelType::SignedInt16
            | ChannelType::UnsignedInt16
            | ChannelType::HalfFloat
            | ChannelType::UnormShort565
            | ChannelType::UnormShort555 => 2,
            ChannelType::SignedInt32
            | ChannelType::UnsignedInt32
            | ChannelType::Float
            | ChannelType::UnormInt101010
            | ChannelType::UnormInt101010_2 => 4,
        }
    }

    /// Legal channel counts for this type.
    pub fn channel_range(&self) -> RangeInclusive<u8> {
        match self {
            ChannelType::UnormShort565
            | ChannelType::UnormShort555
            | ChannelType::UnormInt101010 => 3..=4,
            ChannelType::UnormInt101010_2 => 4..=4,
            _ => 1..=4,
        }
    }

    /// Clamp a requested channel count into [`channel_range`](Self::channel_range).
    pub fn clamp_channels(&self, requested: i64) -> u8 {
        let range = self.channel_range();
        requested.clamp(i64::from(*range.start()), i64::from(*range.end())) as u8
    }

    /// How a kernel reads this type back: as unsigned ints, signed ints, or
    /// floats (every normalized, half and packed type reads as float).
    pub fn read_domain(&self) -> ReadDomain {
        match self {
            ChannelType::UnsignedInt8 | ChannelType::UnsignedInt16 | ChannelType::UnsignedInt32 => {
                ReadDomain::Unsigned
            }
            ChannelType::SignedInt8 | ChannelType::SignedInt16 | ChannelType::SignedInt32 => {
                ReadDomain::Signed
            }
            _ => ReadDomain::Float,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================
// Argument kinds
// ============================================================

/// The kind of device memory object an argument is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Buffer,
    Image1D,
    Image2D,
    Image3D,
    Image1DArray,
    Image2DArray,
    Pipe,
}

impl ArgKind {
    pub const ALL: [ArgKind; 7] = [
        ArgKind::Buffer,
        ArgKind::Image1D,
        ArgKind::Image2D,
        ArgKind::Image3D,
        ArgKind::Image1DArray,
        ArgKind::Image2DArray,
        ArgKind::Pipe,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ArgKind::Buffer => "BUFFER",
            ArgKind::Image1D => "IMAGE1D",
            ArgKind::Image2D => "IMAGE2D",
            ArgKind::Image3D => "IMAGE3D",
            ArgKind::Image1DArray => "IMAGE1D_ARRAY",
            ArgKind::Image2DArray => "IMAGE2D_ARRAY",
            ArgKind::Pipe => "PIPE",
        }
    }

    pub fn from_name(name: &str) -> Option<ArgKind> {
        ArgKind::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, ArgKind::Buffer | ArgKind::Pipe)
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================
// Channel format
// ============================================================

/// Element storage: channel type plus channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelFormat {
    pub channel_type: ChannelType,
    pub channels: u8,
}

impl ChannelFormat {
    /// Build a format, clamping `channels` into the type's legal range.
    pub fn new(channel_type: ChannelType, channels: u8) -> Self {
        ChannelFormat {
            channel_type,
            channels: channel_type.clamp_channels(i64::from(channels)),
        }
    }

    /// Bytes per element in host memory.
    pub fn bytes_per_element(&self) -> usize {
        if self.channel_type.is_packed() {
            self.channel_type.unit_bytes()
        } else {
            self.channel_type.unit_bytes() * usize::from(self.channels)
        }
    }

    /// The format actually stored on the device for an argument of `kind`.
    ///
    /// Device textures have no 3-channel layouts, so unpacked 3-channel
    /// images are widened to 4 channels. Buffers keep their declared layout.
    pub fn device_format(&self, kind: ArgKind) -> ChannelFormat {
        if kind.is_image() && self.channels == 3 && !self.channel_type.is_packed() {
            ChannelFormat { channel_type: self.channel_type, channels: 4 }
        } else {
            *self
        }
    }
}

impl fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.channel_type, self.channels)
    }
}

// ============================================================
// Type descriptors and hints
// ============================================================

/// What a kernel reads an element as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadDomain {
    Unsigned,
    Signed,
    Float,
    Half,
}

impl ReadDomain {
    fn from_char(c: char) -> Option<ReadDomain> {
        match c {
            'u' => Some(ReadDomain::Unsigned),
            'i' => Some(ReadDomain::Signed),
            'f' => Some(ReadDomain::Float),
            'h' => Some(ReadDomain::Half),
            _ => None,
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, ReadDomain::Float | ReadDomain::Half)
    }
}

/// Expected storage width (integer domains) or value range (float domains).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HintWidth {
    Char,
    Short,
    Int,
    UnsignedNorm,
    SignedNorm,
    Full,
}

/// Typed description of what a kernel parameter expects.
///
/// `width` and `channels` are `None` when the producer cannot tell (a
/// reflected `texture_2d<f32>` only fixes the domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub domain: ReadDomain,
    pub width: Option<HintWidth>,
    pub channels: Option<u8>,
}

impl TypeDescriptor {
    pub const fn domain_only(domain: ReadDomain) -> Self {
        TypeDescriptor { domain, width: None, channels: None }
    }

    /// Whether data stored as `ty` is what this descriptor expects to read.
    pub fn accepts(&self, ty: ChannelType) -> bool {
        let Some(width) = self.width else {
            return match self.domain {
                ReadDomain::Unsigned => ty.read_domain() == ReadDomain::Unsigned,
                ReadDomain::Signed => ty.read_domain() == ReadDomain::Signed,
                ReadDomain::Float | ReadDomain::Half => ty.read_domain() == ReadDomain::Float,
            };
        };
        use ChannelType as T;
        use HintWidth as W;
        use ReadDomain as D;
        match ty {
            T::UnsignedInt8 => self.domain == D::Unsigned && width == W::Char,
            T::UnsignedInt16 => self.domain == D::Unsigned && width == W::Short,
            T::UnsignedInt32 => self.domain == D::Unsigned && width == W::Int,
            T::SignedInt8 => self.domain == D::Signed && width == W::Char,
            T::SignedInt16 => self.domain == D::Signed && width == W::Short,
            T::SignedInt32 => self.domain == D::Signed && width == W::Int,
            T::SnormInt8 | T::SnormInt16 => width == W::SignedNorm && self.domain.is_float(),
            T::HalfFloat => self.domain.is_float(),
            T::Float => self.domain == D::Float,
            // Everything else is unsigned normalized.
            _ => width == W::UnsignedNorm && self.domain.is_float(),
        }
    }

    /// Channels the descriptor expects beyond what `format` provides.
    pub fn channel_shortfall(&self, format: &ChannelFormat) -> Option<u8> {
        self.channels
            .filter(|&want| want > format.channels)
            .map(|want| want - format.channels)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.domain)?;
        if let Some(w) = self.width {
            write!(f, "/{w:?}")?;
        }
        if let Some(c) = self.channels {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

/// A parsed identifier type hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHint {
    pub descriptor: TypeDescriptor,
    /// Trailing `n`: the stage expects to create this output, not reuse one.
    pub fresh: bool,
}

impl TypeHint {
    /// Parse the hint suffix of a kernel parameter identifier.
    ///
    /// Returns `None` when the identifier carries no well-formed hint; a
    /// missing hint is never an error.
    pub fn parse(identifier: &str) -> Option<TypeHint> {
        let (_, suffix) = identifier.rsplit_once('_')?;
        let chars: Vec<char> = suffix.chars().collect();
        let fresh = match chars.len() {
            3 => false,
            4 if chars[3] == 'n' => true,
            _ => return None,
        };

        let domain = ReadDomain::from_char(chars[0])?;
        let width = match (domain.is_float(), chars[1]) {
            (false, 'c') => HintWidth::Char,
            (false, 's') => HintWidth::Short,
            (false, 'i') => HintWidth::Int,
            (true, 'u') => HintWidth::UnsignedNorm,
            (true, 's') => HintWidth::SignedNorm,
            (true, 'f') => HintWidth::Full,
            _ => return None,
        };
        let channels = match chars[2] {
            c @ '1'..='4' => c as u8 - b'0',
            _ => return None,
        };

        Some(TypeHint {
            descriptor: TypeDescriptor { domain, width: Some(width), channels: Some(channels) },
            fresh,
        })
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(id: &str) -> TypeHint {
        TypeHint::parse(id).unwrap_or_else(|| panic!("no hint in {id}"))
    }

    #[test]
    fn test_channel_type_names() {
        for ty in ChannelType::ALL {
            assert_eq!(ChannelType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ChannelType::from_name("float"), None);
        assert_eq!(ChannelType::from_name("RGBA"), None);
    }

    #[test]
    fn test_arg_kind_names() {
        for kind in ArgKind::ALL {
            assert_eq!(ArgKind::from_name(kind.name()), Some(kind));
        }
        assert!(ArgKind::Image2DArray.is_image());
        assert!(!ArgKind::Buffer.is_image());
        assert!(!ArgKind::Pipe.is_image());
    }

    #[test]
    fn test_channel_clamping() {
        assert_eq!(ChannelType::Float.clamp_channels(0), 1);
        assert_eq!(ChannelType::Float.clamp_channels(9), 4);
        assert_eq!(ChannelType::UnormShort565.clamp_channels(1), 3);
        assert_eq!(ChannelType::UnormInt101010_2.clamp_channels(3), 4);
        assert_eq!(ChannelFormat::new(ChannelType::UnormShort555, 2).channels, 3);
    }

    #[test]
    fn test_bytes_per_element() {
        assert_eq!(ChannelFormat::new(ChannelType::UnormInt8, 1).bytes_per_element(), 1);
        assert_eq!(ChannelFormat::new(ChannelType::Float, 4).bytes_per_element(), 16);
        assert_eq!(ChannelFormat::new(ChannelType::HalfFloat, 2).bytes_per_element(), 4);
        assert_eq!(ChannelFormat::new(ChannelType::UnormShort565, 3).bytes_per_element(), 2);
        assert_eq!(ChannelFormat::new(ChannelType::UnormInt101010_2, 4).bytes_per_element(), 4);
    }

    #[test]
    fn test_three_channel_images_widen() {
        let rgb = ChannelFormat::new(ChannelType::UnormInt8, 3);
        assert_eq!(rgb.device_format(ArgKind::Image2D).channels, 4);
        assert_eq!(rgb.device_format(ArgKind::Buffer).channels, 3);
        let packed = ChannelFormat::new(ChannelType::UnormShort565, 3);
        assert_eq!(packed.device_format(ArgKind::Image2D), packed);
    }

    #[test]
    fn test_hint_parse() {
        let h = hint("dst_fu4n");
        assert!(h.fresh);
        assert_eq!(h.descriptor.domain, ReadDomain::Float);
        assert_eq!(h.descriptor.width, Some(HintWidth::UnsignedNorm));
        assert_eq!(h.descriptor.channels, Some(4));

        let h = hint("histogram_ui1");
        assert!(!h.fresh);
        assert_eq!(h.descriptor.domain, ReadDomain::Unsigned);
        assert_eq!(h.descriptor.width, Some(HintWidth::Int));
    }

    #[test]
    fn test_hint_rejects_malformed() {
        assert_eq!(TypeHint::parse("src"), None);
        assert_eq!(TypeHint::parse("src_fu"), None);
        assert_eq!(TypeHint::parse("src_fu5"), None);
        assert_eq!(TypeHint::parse("src_fu40"), None);
        assert_eq!(TypeHint::parse("src_fc1"), None); // 'c' is an integer width
        assert_eq!(TypeHint::parse("src_uf1"), None); // 'f' is a float range
        assert_eq!(TypeHint::parse("src_xu1"), None);
        assert_eq!(TypeHint::parse("src_fu1x"), None);
    }

    #[test]
    fn test_hint_uses_last_segment() {
        let h = hint("edge_map_hf2");
        assert_eq!(h.descriptor.domain, ReadDomain::Half);
        assert_eq!(h.descriptor.channels, Some(2));
    }

    #[test]
    fn test_integer_hints_match_exact_width() {
        assert!(hint("a_uc1").descriptor.accepts(ChannelType::UnsignedInt8));
        assert!(!hint("a_uc1").descriptor.accepts(ChannelType::UnsignedInt16));
        assert!(!hint("a_uc1").descriptor.accepts(ChannelType::SignedInt8));
        assert!(hint("a_ii1").descriptor.accepts(ChannelType::SignedInt32));
    }

    #[test]
    fn test_float_hints() {
        // unorm types want 'u' range
        assert!(hint("a_fu1").descriptor.accepts(ChannelType::UnormInt8));
        assert!(hint("a_hu1").descriptor.accepts(ChannelType::UnormShort565));
        assert!(!hint("a_ff1").descriptor.accepts(ChannelType::UnormInt8));
        // snorm wants 's'
        assert!(hint("a_fs1").descriptor.accepts(ChannelType::SnormInt16));
        assert!(!hint("a_fu1").descriptor.accepts(ChannelType::SnormInt8));
        // half accepts either float domain, float only 'f'
        assert!(hint("a_hf1").descriptor.accepts(ChannelType::HalfFloat));
        assert!(hint("a_ff1").descriptor.accepts(ChannelType::HalfFloat));
        assert!(hint("a_ff1").descriptor.accepts(ChannelType::Float));
        assert!(!hint("a_hf1").descriptor.accepts(ChannelType::Float));
        assert!(!hint("a_uc1").descriptor.accepts(ChannelType::Float));
    }

    #[test]
    fn test_domain_only_descriptor() {
        let f = TypeDescriptor::domain_only(ReadDomain::Float);
        assert!(f.accepts(ChannelType::UnormInt8));
        assert!(f.accepts(ChannelType::Float));
        assert!(!f.accepts(ChannelType::UnsignedInt8));
        let u = TypeDescriptor::domain_only(ReadDomain::Unsigned);
        assert!(u.accepts(ChannelType::UnsignedInt32));
        assert!(!u.accepts(ChannelType::SignedInt32));
    }

    #[test]
    fn test_channel_shortfall() {
        let two = ChannelFormat::new(ChannelType::Float, 2);
        assert_eq!(hint("a_ff4").descriptor.channel_shortfall(&two), Some(2));
        assert_eq!(hint("a_ff2").descriptor.channel_shortfall(&two), None);
        assert_eq!(TypeDescriptor::domain_only(ReadDomain::Float).channel_shortfall(&two), None);
    }
}
