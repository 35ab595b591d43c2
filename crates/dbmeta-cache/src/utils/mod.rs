mod defer;

pub(crate) use defer::defer;
