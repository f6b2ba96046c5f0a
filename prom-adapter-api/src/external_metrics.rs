use serde::{Deserialize, Serialize};

use crate::default;
use crate::k8s;
use crate::metav1;
use crate::resource;

pub mod v1beta1;
