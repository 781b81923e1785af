//! Metrics hooks.
//!
//! Events go out as `tracing` records under a `slicewise` span; wire a
//! subscriber in the binary to collect them.

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::trace_span!("slicewise", event);
    let _entered = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}
