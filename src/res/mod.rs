mod node;

use std::sync::Arc;

use kube::runtime::reflector::Store;
pub use node::*;
#[cfg(test)]
pub(crate) use node::fixtures;

use crate::{CoreNode, Result};

/// Read access to the locally cached node list.
pub trait NodeLister {
    fn list(&self) -> Result<Vec<Arc<CoreNode>>>;
}

impl NodeLister for Store<CoreNode> {
    fn list(&self) -> Result<Vec<Arc<CoreNode>>> {
        Ok(self.state())
    }
}

impl NodeLister for Vec<CoreNode> {
    fn list(&self) -> Result<Vec<Arc<CoreNode>>> {
        Ok(self.iter().cloned().map(Arc::new).collect())
    }
}
