use serde::Serialize;

use crate::types::{Dp, DpMap, DpValue};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DpChange {
    pub dp: Dp,
    pub old: Option<DpValue>,
    pub new: DpValue,
}

/// Keys of `update` whose value differs from `previous`. Keys missing from
/// `update` are never reported: updates are partial, absence is not removal.
pub(crate) fn diff_dps(previous: &DpMap, update: &DpMap) -> Vec<DpChange> {
    update
        .iter()
        .filter(|(dp, new)| previous.get(*dp) != Some(*new))
        .map(|(dp, new)| DpChange {
            dp: *dp,
            old: previous.get(dp).cloned(),
            new: new.clone(),
        })
        .collect()
}
