pub use crate::generic::Role;
pub use anyhow::{anyhow, bail, ensure, Context as _, Error, Result};
pub use futures::{AsyncReadExt as _, AsyncWriteExt as _, StreamExt as _};
pub use log::{debug, trace, warn};
pub use serde::{Deserialize, Serialize};
pub use std::{io, sync::Arc, time::Duration};
