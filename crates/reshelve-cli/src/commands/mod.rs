pub(crate) mod apply;
pub(crate) mod preview;
pub(crate) mod scan;
pub(crate) mod strategies;
