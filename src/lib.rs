pub mod catalog;
pub mod constants;
pub mod counterparts;
pub mod group_resolver;
pub mod invariants;
pub mod master_selector;
pub mod matching;
pub mod metasource_errors;
pub mod pre_class;
pub mod resolver;
pub mod sky_geometry;
pub mod sources;
pub mod spatial_index;
pub mod store;
