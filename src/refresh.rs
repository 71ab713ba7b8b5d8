use bitflags::bitflags;

bitflags! {
    /// Stages that have to be recomputed after a parameter change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RefreshMask: u32 {
        const INIT = 1 << 0;
        const LINDENOISE = 1 << 1;
        const SPOT = 1 << 2;
        const HDR = 1 << 3;
        const TRANSFORM = 1 << 4;
        const RGBCURVE = 1 << 5;
        const LUMACURVE = 1 << 6;
        const LUMINANCE = 1 << 7;
        const COLOR = 1 << 8;
        const ALL = Self::INIT.bits()
            | Self::LINDENOISE.bits()
            | Self::SPOT.bits()
            | Self::HDR.bits()
            | Self::TRANSFORM.bits()
            | Self::RGBCURVE.bits()
            | Self::LUMACURVE.bits()
            | Self::LUMINANCE.bits()
            | Self::COLOR.bits();
    }
}

impl RefreshMask {
    /// Changes that invalidate anything computed from full-image upstream data.
    pub const UPSTREAM: Self = Self::INIT
        .union(Self::LINDENOISE)
        .union(Self::SPOT)
        .union(Self::HDR);

    pub fn touches_upstream(self) -> bool {
        self.intersects(Self::UPSTREAM)
    }
}
