//! Cross-module flows: registry through binder, and processors end to end.
