use std::ops::RangeInclusive;

use ash::vk;

/// Raw format values that became core in each API minor version. Later
/// versions only add formats, so the supported set for minor `n` is the
/// union of every entry with a minor version `<= n`.
const CORE_FORMAT_RANGES: &[(u32, RangeInclusive<i32>)] = &[
    // UNDEFINED ..= ASTC_12X12_SRGB_BLOCK
    (0, 0..=184),
    // G8B8G8R8_422_UNORM ..= G16_B16_R16_3PLANE_444_UNORM
    (1, 1_000_156_000..=1_000_156_033),
    // ASTC_4X4_SFLOAT_BLOCK ..= ASTC_12X12_SFLOAT_BLOCK
    (3, 1_000_066_000..=1_000_066_013),
    // G8_B8R8_2PLANE_444_UNORM ..= G16_B16R16_2PLANE_444_UNORM
    (3, 1_000_330_000..=1_000_330_003),
    // A4R4G4B4_UNORM_PACK16 ..= A4B4G4R4_UNORM_PACK16
    (3, 1_000_340_000..=1_000_340_001),
];

pub fn format_ranges_for(api_minor: u32) -> impl Iterator<Item = RangeInclusive<i32>> {
    CORE_FORMAT_RANGES
        .iter()
        .filter(move |(minor, _)| *minor <= api_minor)
        .map(|(_, range)| range.clone())
}

pub fn core_formats(api_minor: u32) -> impl Iterator<Item = vk::Format> {
    format_ranges_for(api_minor)
        .flatten()
        .map(vk::Format::from_raw)
}

/// Tiling and buffer features a device reports for one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatSupport {
    pub linear_tiling: vk::FormatFeatureFlags,
    pub optimal_tiling: vk::FormatFeatureFlags,
    pub buffer: vk::FormatFeatureFlags,
}

impl FormatSupport {
    pub fn is_empty(&self) -> bool {
        self.linear_tiling.is_empty() && self.optimal_tiling.is_empty() && self.buffer.is_empty()
    }

    pub fn supports(&self, tiling: vk::ImageTiling, features: vk::FormatFeatureFlags) -> bool {
        match tiling {
            vk::ImageTiling::LINEAR => self.linear_tiling.contains(features),
            vk::ImageTiling::OPTIMAL => self.optimal_tiling.contains(features),
            _ => false,
        }
    }
}

impl From<vk::FormatProperties> for FormatSupport {
    fn from(properties: vk::FormatProperties) -> Self {
        Self {
            linear_tiling: properties.linear_tiling_features,
            optimal_tiling: properties.optimal_tiling_features,
            buffer: properties.buffer_features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_1_0_only_has_base_formats() {
        let formats: Vec<_> = core_formats(0).collect();
        assert_eq!(formats.len(), 185);
        assert_eq!(formats.first(), Some(&vk::Format::UNDEFINED));
        assert_eq!(formats.last(), Some(&vk::Format::ASTC_12X12_SRGB_BLOCK));
    }

    #[test]
    fn ranges_are_additive() {
        let v1_1 = core_formats(1).count();
        let v1_2 = core_formats(2).count();
        let v1_3 = core_formats(3).count();

        assert_eq!(v1_1, 185 + 34);
        assert_eq!(v1_2, v1_1);
        assert_eq!(v1_3, v1_2 + 14 + 4 + 2);
        assert!(core_formats(1).any(|format| format == vk::Format::G8B8G8R8_422_UNORM));
        assert!(!core_formats(2).any(|format| format == vk::Format::A4R4G4B4_UNORM_PACK16));
        assert!(core_formats(3).any(|format| format == vk::Format::A4R4G4B4_UNORM_PACK16));
    }

    #[test]
    fn support_checks_requested_tiling() {
        let support = FormatSupport {
            linear_tiling: vk::FormatFeatureFlags::TRANSFER_SRC,
            optimal_tiling: vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
            buffer: vk::FormatFeatureFlags::empty(),
        };

        assert!(support.supports(vk::ImageTiling::OPTIMAL, vk::FormatFeatureFlags::SAMPLED_IMAGE));
        assert!(!support.supports(vk::ImageTiling::LINEAR, vk::FormatFeatureFlags::SAMPLED_IMAGE));
        assert!(!support.is_empty());
        assert!(FormatSupport::default().is_empty());
    }
}
