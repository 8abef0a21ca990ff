use crate::datagram::Datagram;

use super::TypeAggregator;

/// Keeps only the most recent datagram of a group, unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastValue;

impl TypeAggregator for LastValue {
    fn aggregate(&self, group: Vec<Datagram>) -> Vec<Datagram> {
        group.into_iter().last().into_iter().collect()
    }
}
