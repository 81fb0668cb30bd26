//! Conversion status codes and the legal transitions between them.
//!
//! The numeric values are the ones stored in `conversions.status_id`.
//! Negative codes are terminal failures, the 10+ range holds the
//! sub-stages of an active job.

use std::fmt;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                Self::ALL.iter().copied().find(|status| status.id() == id)
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Conversion job lifecycle status.
    ConversionStatus {
        Dismissed = -2,
        Failed = -1,
        Pending = 0,
        Processing = 1,
        Done = 2,
        Downloading = 10,
        Stitching = 11,
    }
}

impl ConversionStatus {
    /// Statuses a worker is actively driving.
    pub const ACTIVE: [Self; 3] = [Self::Processing, Self::Downloading, Self::Stitching];

    /// Done, Failed and Dismissed never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Dismissed)
    }

    /// Claimed by a worker and not yet finished.
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    /// Whether a job in `self` may move to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConversionStatus::*;

        match (self, next) {
            (Pending, Processing | Dismissed) => true,
            (Processing, Downloading | Failed | Dismissed) => true,
            (Downloading, Stitching | Done | Failed | Dismissed) => true,
            (Stitching, Done | Failed | Dismissed) => true,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Dismissed => "dismissed",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Downloading => "downloading",
            Self::Stitching => "stitching",
        }
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
