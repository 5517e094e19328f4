use serde::{Deserialize, Serialize};

use crate::ident::ZoneName;

/// A named logical grouping of interfaces for policy attachment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: ZoneName,
}

impl Zone {
    pub fn new(name: impl Into<ZoneName>) -> Self {
        Self { name: name.into() }
    }
}
