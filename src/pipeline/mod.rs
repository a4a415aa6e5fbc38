mod coarse;
pub mod color;
mod fine;
mod register;
pub mod types;

pub use register::register_image;
pub use types::{Capabilities, ImageInput, RegistrationResult, StageReport, TemplateImages};

/// `"img.png"` + `"-crop"` -> `"img-crop.png"`; names without an extension
/// get the suffix appended.
pub(crate) fn suffixed(name: &str, suffix: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}{suffix}.{ext}"),
        None => format!("{name}{suffix}"),
    }
}
