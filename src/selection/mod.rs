//! Magic selection: flood-fill regions and their preview/commit lifecycle

pub mod flood_fill;
pub mod state;

pub use flood_fill::select;
pub use state::{
    consolidate, stamp_regions, MagicRegion, MagicSelectionState, RegionMode, DEFAULT_TOLERANCE,
};
