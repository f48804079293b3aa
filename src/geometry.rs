//! Detector geometry: binning, region of interest and chip models.
//!
//! All ROIs handed to and from the hardware facets are expressed in *binned*
//! coordinates. An empty ROI is a sentinel for "full frame at the current
//! binning" and is resolved with [`GeometryState::effective_roi`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-axis hardware binning factor. Both factors are always >= 1.
///
/// Deserialization goes through [`Bin::new`], so a zero factor is rejected
/// instead of reaching the coordinate divisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBin")]
pub struct Bin {
    x: u32,
    y: u32,
}

#[derive(Deserialize)]
struct RawBin {
    x: u32,
    y: u32,
}

impl TryFrom<RawBin> for Bin {
    type Error = String;

    fn try_from(raw: RawBin) -> Result<Self, Self::Error> {
        Bin::new(raw.x, raw.y)
            .ok_or_else(|| format!("invalid binning {}x{}: factors must be >= 1", raw.x, raw.y))
    }
}

impl Bin {
    /// No binning.
    pub const IDENTITY: Bin = Bin { x: 1, y: 1 };

    /// Create a binning factor, `None` if either axis is zero.
    #[must_use]
    pub fn new(x: u32, y: u32) -> Option<Self> {
        (x > 0 && y > 0).then_some(Self { x, y })
    }

    /// Horizontal factor.
    #[must_use]
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Vertical factor.
    #[must_use]
    pub fn y(&self) -> u32 {
        self.y
    }

    /// True for 1x1.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Bin {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}x{}>", self.x, self.y)
    }
}

/// Image size in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size divided by the binning factor (integer division, as the hardware does).
    #[must_use]
    pub fn binned(&self, bin: Bin) -> Self {
        Self::new(self.width / bin.x(), self.height / bin.y())
    }
}

/// Region of Interest for camera acquisition
///
/// A zero-area ROI is the "empty" sentinel meaning "use the full detector area".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Roi {
    /// X-coordinate of top-left corner in pixels
    pub x: u32,
    /// Y-coordinate of top-left corner in pixels
    pub y: u32,
    /// Width of ROI in pixels
    pub width: u32,
    /// Height of ROI in pixels
    pub height: u32,
}

impl Roi {
    /// Create a new ROI.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The "full frame" sentinel.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// ROI covering `size` from the origin.
    #[must_use]
    pub const fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// True for the "full frame" sentinel (zero area).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Calculate area in pixels
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Size of the ROI.
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Convert unbinned detector coordinates to binned coordinates.
    #[must_use]
    pub fn binned(&self, bin: Bin) -> Self {
        Self::new(
            self.x / bin.x(),
            self.y / bin.y(),
            self.width / bin.x(),
            self.height / bin.y(),
        )
    }

    /// Convert binned coordinates back to unbinned detector coordinates.
    #[must_use]
    pub fn unbinned(&self, bin: Bin) -> Self {
        Self::new(
            self.x * bin.x(),
            self.y * bin.y(),
            self.width * bin.x(),
            self.height * bin.y(),
        )
    }

    /// Move an explicit ROI from binning `from` to binning `to`.
    ///
    /// `frame` is the binned frame size at `to`. Width and height never drop
    /// below one pixel, so a small ROI is not turned into the empty sentinel,
    /// and the result stays inside `frame`.
    #[must_use]
    pub fn rebinned(&self, from: Bin, to: Bin, frame: Size) -> Self {
        let scaled = self.unbinned(from).binned(to);
        let width = scaled.width.clamp(1, frame.width.max(1));
        let height = scaled.height.clamp(1, frame.height.max(1));
        Self::new(
            scaled.x.min(frame.width.saturating_sub(width)),
            scaled.y.min(frame.height.saturating_sub(height)),
            width,
            height,
        )
    }

    /// Check if ROI is valid for given sensor size
    #[must_use]
    pub fn is_valid_for(&self, size: Size) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(size.width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(size.height)
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<empty>");
        }
        write!(
            f,
            "<{},{}>-<{}x{}>",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Current binning and ROI as reported by the hardware.
///
/// Owned by the geometry subsystem; the correction layer only ever sees copies
/// delivered through change events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GeometryState {
    /// Hardware binning
    pub bin: Bin,
    /// ROI in binned coordinates, or the empty sentinel
    pub roi: Roi,
}

impl GeometryState {
    /// Full frame at the current binning.
    #[must_use]
    pub fn max_roi(&self, max_image_size: Size) -> Roi {
        Roi::full(max_image_size.binned(self.bin))
    }

    /// The ROI actually read out: the stored one, or the full frame for the sentinel.
    #[must_use]
    pub fn effective_roi(&self, max_image_size: Size) -> Roi {
        if self.roi.is_empty() {
            self.max_roi(max_image_size)
        } else {
            self.roi
        }
    }
}

/// CCD chip fitted in the detector head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipType {
    /// Atmel 2048x2048
    Atmel,
    /// Kodak 2048x2048
    Kodak,
    /// E2V 2048x2048, MPP mode
    E2v2k,
    /// E2V 2048x2048, non-MPP mode
    E2v2kNotMpp,
    /// E2V 4096x4096, MPP mode
    E2v4k,
    /// E2V 4096x4096, non-MPP mode
    E2v4kNotMpp,
    /// Hamamatsu line sensor
    Hama,
}

impl ChipType {
    /// Unbinned sensor size.
    #[must_use]
    pub fn max_frame_size(&self) -> Size {
        match self {
            ChipType::Atmel | ChipType::Kodak | ChipType::E2v2k | ChipType::E2v2kNotMpp => {
                Size::new(2048, 2048)
            }
            ChipType::E2v4k | ChipType::E2v4kNotMpp => Size::new(4096, 4096),
            ChipType::Hama => Size::new(2048, 1),
        }
    }

    /// Pixel pitch in metres.
    #[must_use]
    pub fn pixel_size(&self) -> f64 {
        match self {
            ChipType::Atmel | ChipType::Hama => 14e-6,
            ChipType::Kodak => 24e-6,
            ChipType::E2v2k | ChipType::E2v2kNotMpp | ChipType::E2v4k | ChipType::E2v4kNotMpp => {
                15e-6
            }
        }
    }

    /// Whether the E2V readout correction applies to this chip.
    ///
    /// Only the MPP 2k E2V sensor needs it.
    #[must_use]
    pub fn is_corrigible(&self) -> bool {
        matches!(self, ChipType::E2v2k)
    }

    /// Short model name used in the camera description string.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ChipType::Atmel => "Atmel",
            ChipType::Kodak => "Kodak",
            ChipType::E2v2k => "E2V-2k",
            ChipType::E2v2kNotMpp => "E2V-2k-NotMPP",
            ChipType::E2v4k => "E2V-4k",
            ChipType::E2v4kNotMpp => "E2V-4k-NotMPP",
            ChipType::Hama => "Hamamatsu",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_rejects_zero() {
        assert!(Bin::new(0, 1).is_none());
        assert!(Bin::new(1, 0).is_none());
        assert_eq!(Bin::new(2, 4).map(|b| (b.x(), b.y())), Some((2, 4)));
        assert!(Bin::default().is_identity());
    }

    #[test]
    fn test_deserialized_bin_keeps_invariant() {
        use figment::providers::{Format, Toml};
        use figment::Figment;

        let bin: Bin = Figment::from(Toml::string("x = 2\ny = 4"))
            .extract()
            .unwrap();
        assert_eq!(bin, Bin::new(2, 4).unwrap());

        for toml in ["x = 0\ny = 2", "x = 2\ny = 0"] {
            let err = Figment::from(Toml::string(toml)).extract::<Bin>().unwrap_err();
            assert!(err.to_string().contains("factors must be >= 1"), "{err}");
        }
    }

    #[test]
    fn test_roi_binning_conversion() {
        let bin = Bin::new(2, 4).unwrap();
        let roi = Roi::new(100, 200, 400, 800);
        let binned = roi.binned(bin);
        assert_eq!(binned, Roi::new(50, 50, 200, 200));
        assert_eq!(binned.unbinned(bin), roi);
    }

    #[test]
    fn test_empty_roi_resolves_to_binned_full_frame() {
        let state = GeometryState {
            bin: Bin::new(2, 2).unwrap(),
            roi: Roi::empty(),
        };
        let max = Size::new(1024, 1024);
        assert_eq!(state.effective_roi(max), Roi::new(0, 0, 512, 512));
    }

    #[test]
    fn test_explicit_roi_is_kept() {
        let state = GeometryState {
            bin: Bin::new(2, 2).unwrap(),
            roi: Roi::new(10, 10, 20, 20),
        };
        assert_eq!(
            state.effective_roi(Size::new(1024, 1024)),
            Roi::new(10, 10, 20, 20)
        );
    }

    #[test]
    fn test_rebinned_roi_never_becomes_empty() {
        let frame = Size::new(1024, 1024);
        let roi = Roi::new(10, 10, 1, 1).rebinned(Bin::IDENTITY, Bin::new(2, 2).unwrap(), frame);
        assert_eq!(roi, Roi::new(5, 5, 1, 1));
        assert!(!roi.is_empty());
    }

    #[test]
    fn test_rebinned_roi_stays_in_frame() {
        // 2048 / 3 = 682 binned pixels, the last unbinned column maps to 682
        let frame = Size::new(2048, 2048).binned(Bin::new(3, 3).unwrap());
        let roi = Roi::new(2047, 0, 1, 1).rebinned(Bin::IDENTITY, Bin::new(3, 3).unwrap(), frame);
        assert_eq!(roi, Roi::new(681, 0, 1, 1));
        assert!(roi.is_valid_for(frame));
    }

    #[test]
    fn test_roi_validity() {
        let size = Size::new(2048, 2048);
        assert!(Roi::new(0, 0, 2048, 2048).is_valid_for(size));
        assert!(!Roi::new(1, 0, 2048, 2048).is_valid_for(size));
    }

    #[test]
    fn test_only_e2v_2k_is_corrigible() {
        assert!(ChipType::E2v2k.is_corrigible());
        for chip in [
            ChipType::Atmel,
            ChipType::Kodak,
            ChipType::E2v2kNotMpp,
            ChipType::E2v4k,
            ChipType::E2v4kNotMpp,
            ChipType::Hama,
        ] {
            assert!(!chip.is_corrigible(), "{chip:?}");
        }
    }

    #[test]
    fn test_chip_frame_sizes() {
        assert_eq!(ChipType::E2v4k.max_frame_size(), Size::new(4096, 4096));
        assert_eq!(ChipType::Hama.max_frame_size(), Size::new(2048, 1));
    }
}
