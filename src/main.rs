use clap::{Parser, ValueEnum};
use log::{error, LevelFilter};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use servectl::config::ServingConfig;
use servectl::process::SignalMode;
use servectl::supervisor;

/// Host a trained model with one line command:
/// `servectl --model ./serving_server_model --port 9292`
#[derive(Parser)]
#[command(name = "servectl", about = "Start or stop a model-serving worker")]
struct Cli {
    /// start, stop, or kill the serving process
    #[arg(value_enum, default_value_t = ServerCommand::Start)]
    server: ServerCommand,

    /// Concurrency of the worker, [4,1024]
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(4..=1024))]
    thread: u16,

    /// Port of the service. For stop/kill, omitting it processes every
    /// registered process.
    #[arg(long)]
    port: Option<u16>,

    /// Type of device. Kept for interface compatibility; the worker mode is
    /// derived from --gpu-ids.
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Device ids, one selector per operator (comma-joined within a selector)
    #[arg(long, num_args = 1..)]
    gpu_ids: Vec<String>,

    /// Runtime thread count of each operator
    #[arg(long, num_args = 1..)]
    runtime_thread_num: Vec<u32>,

    /// Max inference batch of each operator
    #[arg(long, num_args = 1.., default_values_t = [32u32])]
    batch_infer_size: Vec<u32>,

    /// Model directories for serving
    #[arg(long, num_args = 1..)]
    model: Vec<String>,

    /// Explicit operator names (`name`, or `name:0` to share the default engine)
    #[arg(long, num_args = 1..)]
    op: Vec<String>,

    /// Working dir of the service
    #[arg(long, default_value = "workdir")]
    workdir: String,

    /// Use MKL
    #[arg(long)]
    use_mkl: bool,

    /// Precision mode (fp32, int8, fp16, bf16)
    #[arg(long, default_value = "fp32")]
    precision: String,

    /// Use TensorRT calibration
    #[arg(long)]
    use_calib: bool,

    /// Turn memory optimization off
    #[arg(long)]
    mem_optim_off: bool,

    /// Graph optimization
    #[arg(long)]
    ir_optim: bool,

    /// Limit size of request bodies, in bytes
    #[arg(long, default_value_t = 512 * 1024 * 1024)]
    max_body_size: usize,

    /// Gate the start behind an encryption-key handshake
    #[arg(long)]
    use_encryption_model: bool,

    /// Use TensorRT
    #[arg(long)]
    use_trt: bool,

    /// Use the lite backend (forces cpu mode)
    #[arg(long)]
    use_lite: bool,

    /// Use XPU
    #[arg(long)]
    use_xpu: bool,

    /// Product name for authentication
    #[arg(long)]
    product_name: Option<String>,

    /// Container id for authentication
    #[arg(long)]
    container_id: Option<String>,

    /// Use one GPU stream per request
    #[arg(long)]
    gpu_multi_stream: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ServerCommand {
    Start,
    Stop,
    Kill,
}

const DEFAULT_PORT: u16 = 9393;

fn setup_logging() -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = "logs";
    std::fs::create_dir_all(log_dir)?;

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}",
        )))
        .build(format!("{log_dir}/servectl.log"))?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;

    log4rs::init_config(config)?;

    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.server {
        ServerCommand::Stop => supervisor::stop(SignalMode::Stop, cli.port)?,
        ServerCommand::Kill => supervisor::stop(SignalMode::Kill, cli.port)?,
        ServerCommand::Start => {
            let config = ServingConfig {
                models: cli.model.iter().map(Into::into).collect(),
                ops: cli.op,
                device_ids: cli.gpu_ids,
                thread_num: cli.thread,
                runtime_thread_num: cli.runtime_thread_num,
                batch_infer_size: cli.batch_infer_size,
                use_mkl: cli.use_mkl,
                mem_optim: !cli.mem_optim_off,
                ir_optim: cli.ir_optim,
                use_trt: cli.use_trt,
                use_lite: cli.use_lite,
                use_xpu: cli.use_xpu,
                use_calib: cli.use_calib,
                gpu_multi_stream: cli.gpu_multi_stream,
                use_encryption_model: cli.use_encryption_model,
                workdir: cli.workdir,
                max_body_size: cli.max_body_size,
                precision: cli.precision,
                product_name: cli.product_name,
                container_id: cli.container_id,
                port: cli.port.unwrap_or(DEFAULT_PORT),
                device: cli.device,
            }
            .validated()?;
            supervisor::start(&config)?;
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging() {
        eprintln!("Failed to set up logging: {e}");
    }

    if let Err(e) = run(cli) {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
