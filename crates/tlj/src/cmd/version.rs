use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("tlj {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("TLJ_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("os: {}", std::env::consts::OS);
    println!("arch: {}", std::env::consts::ARCH);
    println!(
        "features: peer={}, schema={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "schema")
    );
    println!("payload codec: {}", <tlj_frame::JsonCodec as tlj_frame::PayloadCodec>::NAME);
    Ok(SUCCESS)
}
