pub mod user;
pub mod booking;
pub mod package;
pub mod destination;
pub mod category;
pub mod enquiry;
pub mod subscription;
pub mod email_tracking;

pub use user::{Role, User};
pub use booking::{Booking, BookingStatus, NewBooking};
pub use package::{Package, PackageFilter, PackageInput, PackageSummary};
pub use destination::{Destination, DestinationInput};
pub use category::{Category, CategoryInput};
pub use enquiry::{Enquiry, EnquiryStatus, NewEnquiry};
pub use subscription::Subscription;
pub use email_tracking::EmailTracking;

use validator::ValidationError;

/// Slug: lowercase kebab-case (`africa-kenya`, `top-10`).
pub fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && !s.contains("--")
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if is_slug(slug) {
        Ok(())
    } else {
        let mut err = ValidationError::new("slug");
        err.message = Some("must be lowercase kebab-case".into());
        Err(err)
    }
}
