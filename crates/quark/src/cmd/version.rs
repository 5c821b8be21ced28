use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("quark {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: quark");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("QUARK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("frame_version: {}", quark_frame::VERSION);
    println!("key_exchange: ECDH P-384");
    println!("signature: ECDSA P-384/SHA-384");
    println!("cipher: AES-128-CTR");
    println!("transports: http, https, ws, wss");

    Ok(SUCCESS)
}
