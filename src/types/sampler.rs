//! Sampler types and descriptors.

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest neighbor filtering.
    Nearest,
    /// Linear interpolation filtering.
    #[default]
    Linear,
}

/// Address mode for texture coordinates outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Clamp to the edge texel.
    #[default]
    ClampToEdge,
    /// Repeat the texture.
    Repeat,
    /// Repeat with mirroring.
    MirrorRepeat,
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerDescriptor {
    /// Debug label for the sampler.
    pub label: Option<String>,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Filter between mip levels.
    pub mipmap_filter: FilterMode,
    /// Address mode for U and V.
    pub address_mode: AddressMode,
    /// Highest mip level the sampler may read.
    pub max_lod: u32,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self::linear()
    }
}

impl SamplerDescriptor {
    /// Linear filtering on all axes, clamped addressing, all mips.
    pub fn linear() -> Self {
        Self {
            label: Some("linear".to_string()),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
            max_lod: 1000,
        }
    }

    /// Nearest filtering, for pixel-exact textures.
    pub fn nearest() -> Self {
        Self {
            label: Some("nearest".to_string()),
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
            max_lod: 1000,
        }
    }

    /// Set the address mode.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_mode = mode;
        self
    }
}
