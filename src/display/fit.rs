use crate::display::config::DisplayConfig;
use crate::foundation::core::Size;

/// Scaling policy for fitting a picture into bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitPolicy {
    /// Preserve aspect ratio.
    pub keep_aspect: bool,
    /// Leave pictures that already fit at native size.
    pub center: bool,
}

impl Default for FitPolicy {
    fn default() -> Self {
        Self {
            keep_aspect: true,
            center: false,
        }
    }
}

/// Output geometry of `src` scaled into `bounds` under `policy`.
pub fn fit_geometry(src: Size, bounds: Size, policy: FitPolicy) -> Size {
    if src.is_empty() || bounds.is_empty() {
        return src;
    }
    if policy.center && src.fits_within(bounds) {
        return src;
    }
    if !policy.keep_aspect {
        return bounds;
    }
    let (sw, sh) = (u64::from(src.width), u64::from(src.height));
    let (bw, bh) = (u64::from(bounds.width), u64::from(bounds.height));
    let (w, h) = if sw * bh >= sh * bw {
        (bw, (sh * bw + sw / 2) / sw)
    } else {
        ((sw * bh + sh / 2) / sh, bh)
    };
    Size::new(w.max(1) as u32, h.max(1) as u32)
}

/// Decide whether a decoded picture goes through the resizer before display.
///
/// A window only bounds the picture when the display is larger than it on both axes, and
/// then the picture is fitted to the window. Otherwise only pictures larger than the display
/// are scaled down. Software decoded pictures that fit keep their native size.
/// Returns the target geometry in picture orientation.
pub fn plan_resize(
    image: Size,
    display: Size,
    cfg: &DisplayConfig,
    software_decoded: bool,
) -> Option<Size> {
    if image.is_empty() || display.is_empty() {
        return None;
    }
    let policy = FitPolicy {
        keep_aspect: cfg.keep_aspect,
        center: cfg.center,
    };
    let window = cfg
        .window
        .map(|w| w.size())
        .filter(|w| !w.is_empty() && display.width > w.width && display.height > w.height);
    let target = match window {
        Some(window) => fit_geometry(image, cfg.on_screen(window), policy),
        None => {
            // Bounds in picture orientation.
            let bounds = cfg.on_screen(display);
            if image.fits_within(bounds) {
                tracing::trace!(software_decoded, "picture fits, no resize");
                return None;
            }
            fit_geometry(image, bounds, policy)
        }
    };
    (target != image).then_some(target)
}

#[cfg(test)]
#[path = "../../tests/unit/display/fit.rs"]
mod tests;
