//! Shared test helpers for configuration tests.

use std::ffi::OsString;

use ortho_config::{MergeComposer, OrthoConfig};
use serde_json::Value;

use crate::ShortenConfig;

/// Applies a configuration layer to the composer based on the layer type.
pub fn apply_layer(composer: &mut MergeComposer, layer_type: &str, value: Value) {
    match layer_type {
        "defaults" => composer.push_defaults(value),
        "file" => composer.push_file(value, None),
        "environment" => composer.push_environment(value),
        "cli" => composer.push_cli(value),
        _ => panic!("unknown layer type: {layer_type}"),
    }
}

/// Composes a [`ShortenConfig`] from a sequence of `(layer_type, value)` pairs.
pub fn build_config_from_layers(layers: &[(&str, Value)]) -> ShortenConfig {
    let mut composer = MergeComposer::new();

    for (layer_type, value) in layers {
        apply_layer(&mut composer, layer_type, value.clone());
    }

    ShortenConfig::merge_from_layers(composer.layers()).expect("merge should succeed")
}

/// Loads configuration from `cli_args` with `env` applied and config
/// discovery confined to an empty temporary home directory.
pub fn load_with_env(cli_args: &[&str], env: &[(&str, Option<&str>)]) -> ShortenConfig {
    let temp_dir = tempfile::TempDir::new().expect("temp dir should be created");
    let home = temp_dir.path().to_string_lossy().to_string();

    let mut vars: Vec<(&str, Option<&str>)> = vec![
        ("HOME", Some(home.as_str())),
        ("XDG_CONFIG_HOME", Some(home.as_str())),
        ("SHORTEN_OUTPUT_OUTPUT_DIR", None),
        ("SHORTEN_OUTPUT_LINES", None),
        ("SHORTEN_OUTPUT_NODE_ID", None),
        ("SHORTEN_OUTPUT_PHASE", None),
    ];
    for (key, value) in env {
        vars.retain(|(existing, _)| existing != key);
        vars.push((key, *value));
    }
    let _guard = env_lock::lock_env(vars);

    let mut args: Vec<OsString> = vec![OsString::from("shorten-output")];
    args.extend(cli_args.iter().map(OsString::from));

    ShortenConfig::load_from_iter(args).expect("config should load")
}
