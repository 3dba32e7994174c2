use std::env;
use std::process;

use unity_asset_reader::open_path;

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: {} <asset-file>", args[0]);
        process::exit(1);
    }

    let path = &args[1];
    let assets = match open_path(path, None) {
        Ok(assets) => assets,
        Err(e) => {
            eprintln!("failed to open {path}: {e}");
            process::exit(1);
        }
    };

    tracing::info!(asset_count = assets.len(), "unwrapped");

    for (i, asset) in assets.iter().enumerate() {
        println!(
            "asset {i}: version={} platform={} objects={}",
            asset.version,
            asset.platform,
            asset.object_count()
        );
        for promise in asset.promises() {
            println!(
                "  object path_id={} type={}",
                promise.path_id_hex(),
                promise.type_name
            );
            match promise.fulfill() {
                Ok(value) => match value.to_json_pretty() {
                    Ok(json) => println!("{json}"),
                    Err(e) => eprintln!("    failed to render object as JSON: {e}"),
                },
                Err(e) => eprintln!("    failed to decode object: {e}"),
            }
        }
    }
}
