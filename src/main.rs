//! Entry point: parses arguments by hand, mounts the backing image, and
//! hands the result to the kernel bridge.

use sfs::block::FileBlockDevice;
use sfs::filesystem::Filesystem;
use sfs::fuse_adapter::FuseAdapter;
use std::env;
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;

/// Parsed command-line arguments.
struct Args {
    image_path: PathBuf,
    mount_point: PathBuf,
    options: Vec<String>,
    verbosity: i32,
}

/// Prints the command's usage.
fn print_usage(bin: &str) {
    eprintln!("Usage: {bin} [-f] [-o opt[,opt...]] [-v | -q] <image-path> <mount-point>");
    eprintln!();
    eprintln!("Options:");
    eprintln!(" -f, --foreground:\tdo not daemonize (accepted, ignored: this tool never daemonizes)");
    eprintln!(" -o <opt>[,<opt>...]:\tcomma-separated low-level mount options");
    eprintln!(" -v:\t\t\traise log verbosity (repeatable)");
    eprintln!(" -q:\t\t\tlower log verbosity (repeatable)");
    eprintln!(" -h, --help:\t\tprint this message and exit");
}

/// Hand-rolled argument parser in the manner of the teacher's bridge tools:
/// a `match` over the raw argument list rather than a derive-macro parser.
fn parse_args(bin: &str, args: Vec<String>) -> Args {
    let mut positional: Vec<String> = Vec::new();
    let mut options: Vec<String> = Vec::new();
    let mut verbosity = 0i32;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage(bin);
                exit(0);
            }
            "-f" | "--foreground" => {}
            "-o" => {
                let Some(opts) = iter.next() else {
                    eprintln!("{bin}: -o requires an argument");
                    print_usage(bin);
                    exit(1);
                };
                options.extend(opts.split(',').map(str::to_string));
            }
            "-v" => verbosity += 1,
            "-q" => verbosity -= 1,
            other if other.starts_with('-') => {
                eprintln!("{bin}: unrecognized option {other:?}");
                print_usage(bin);
                exit(1);
            }
            other => positional.push(other.to_string()),
        }
    }

    let [image_path, mount_point]: [String; 2] = positional.try_into().unwrap_or_else(|p: Vec<String>| {
        eprintln!("{bin}: expected exactly two positional arguments, got {}", p.len());
        print_usage(bin);
        exit(1);
    });

    let image_path = PathBuf::from(image_path);
    let mount_point = std::fs::canonicalize(&mount_point).unwrap_or_else(|e| {
        eprintln!("{bin}: cannot canonicalize mount point: {e}");
        exit(1);
    });

    Args {
        image_path,
        mount_point,
        options,
        verbosity,
    }
}

fn init_logging(verbosity: i32) {
    let default_level = match verbosity {
        v if v <= -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn main() {
    let mut raw = env::args();
    let bin = raw.next().unwrap_or_else(|| "sfs".to_string());
    let args = parse_args(&bin, raw.collect());

    init_logging(args.verbosity);

    let dev = FileBlockDevice::open(&args.image_path).unwrap_or_else(|e| {
        eprintln!("{bin}: cannot open {}: {e}", args.image_path.display());
        exit(1);
    });
    let fs = Filesystem::mount(dev).unwrap_or_else(|e| {
        eprintln!("{bin}: cannot mount {}: {e}", args.image_path.display());
        exit(1);
    });
    let adapter = FuseAdapter::new(fs);

    let mount_options: Vec<fuser::MountOption> = args
        .options
        .iter()
        .map(|opt| fuser::MountOption::from_str(opt).expect("MountOption::from_str is infallible"))
        .collect();

    log::info!(
        "mounting {} at {}",
        args.image_path.display(),
        args.mount_point.display()
    );
    if let Err(e) = fuser::mount2(adapter, &args.mount_point, &mount_options) {
        eprintln!("{bin}: mount failed: {e}");
        exit(1);
    }
}
