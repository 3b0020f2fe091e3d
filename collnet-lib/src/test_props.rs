use crate::props::resolve_plugin_name;

#[test]
fn default_name_without_override() {
    assert_eq!(resolve_plugin_name(None), "Libfabric");
}

#[test]
fn legacy_names_rewrite_case_insensitively() {
    assert_eq!(resolve_plugin_name(Some("AWS Libfabric")), "AWS Libfabric");
    assert_eq!(resolve_plugin_name(Some("aws libfabric")), "AWS Libfabric");
    assert_eq!(resolve_plugin_name(Some("OFI")), "OFI");
    assert_eq!(resolve_plugin_name(Some("ofi")), "OFI");
}

#[test]
fn unrelated_values_keep_the_default() {
    assert_eq!(resolve_plugin_name(Some("Socket")), "Libfabric");
    assert_eq!(resolve_plugin_name(Some("")), "Libfabric");
}
