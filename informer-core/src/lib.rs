//! Types and traits shared by the podwatch client and runtime
//!
//! This crate is client-less: it describes the objects we cache, how they are
//! identified, how collections are addressed, and what a watch stream carries.
//! Nothing in here performs IO.

pub mod error;
pub use error::ErrorResponse;

pub mod labels;
pub use labels::{Expression, ParseSelectorError, Selector};

pub mod object;
pub use object::{ObjectList, ObjectMeta, ResourceObject, ResourceVersion};

pub mod object_ref;
pub use object_ref::ObjectRef;

pub mod params;
pub use params::{ListParams, WatchParams};

pub mod resource;
pub use resource::{Collection, Kind};

pub mod watch;
pub use watch::WatchEvent;
