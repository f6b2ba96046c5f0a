use serde::{Deserialize, Serialize};

use crate::k8s;
use crate::metav1;
use crate::quantity::{QuantityExt, QuantityParseError};
use crate::resource;

pub mod v1beta1;
