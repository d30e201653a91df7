use std::sync::{Mutex, PoisonError};

use crate::display::config::DisplayRegion;
use crate::foundation::math::raster_checksum;
use crate::raster::buffer::{Image, ImageLayout};

/// One picture shown by a render component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Presentation {
    pub component: u32,
    pub layout: ImageLayout,
    pub checksum: u64,
    pub region: Option<DisplayRegion>,
    pub tunneled: bool,
}

/// Everything that happened on the virtual display, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    Frame(Presentation),
    Region {
        component: u32,
        region: DisplayRegion,
    },
    Removed {
        component: u32,
    },
    Blanked {
        display: u32,
        layer: i32,
    },
}

/// Recording virtual display shared by all simulated render components.
#[derive(Debug, Default)]
pub struct SimDisplay {
    events: Mutex<Vec<DisplayEvent>>,
    last_frame: Mutex<Option<image::RgbaImage>>,
}

impl SimDisplay {
    pub(crate) fn record(&self, event: DisplayEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub(crate) fn present(
        &self,
        component: u32,
        layout: ImageLayout,
        pixels: &[u8],
        region: Option<DisplayRegion>,
        tunneled: bool,
    ) {
        let checksum = raster_checksum(
            pixels,
            layout.row_bytes(),
            layout.stride as usize,
            layout.height as usize,
        );
        if let Ok(img) = Image::from_parts(layout, pixels.to_vec())
            && let Some(rgba) = img.to_rgba()
        {
            *self
                .last_frame
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(rgba);
        }
        self.record(DisplayEvent::Frame(Presentation {
            component,
            layout,
            checksum,
            region,
            tunneled,
        }));
    }

    /// Copy of the event log.
    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pictures shown so far.
    pub fn presentations(&self) -> Vec<Presentation> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Frame(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Last picture shown, as packed RGBA (packed RGB(A) formats only).
    pub fn last_frame(&self) -> Option<image::RgbaImage> {
        self.last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
