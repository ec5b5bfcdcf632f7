// Exists only so `cargo test` compiles this package's [[bin]] target;
// the root crate's integration tests invoke it via CARGO_BIN_EXE_mock-stub.
#[test]
fn binary_target_builds() {}
