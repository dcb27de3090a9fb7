// Cifra - handwritten digit recognition service
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;

use cifra::config::{load_config, Config};
use cifra::data;
use cifra::logging;
use cifra::models::{device_label, format_param_count, get_device, MnistClassifier};
use cifra::server::DigitServer;
use cifra::training::{
    epoch_progress, train_classifier, CheckpointStore, TrainingParams,
};

#[derive(Parser, Debug)]
#[command(name = "cifra")]
#[command(about = "Handwritten digit recognition service", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Bind address (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Train the classifier in the foreground
    Train {
        /// Number of epochs (clamped to the configured maximum)
        #[arg(long)]
        epochs: Option<usize>,
        /// Learning rate for the optimizer
        #[arg(long = "learning-rate")]
        learning_rate: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config()?;
    logging::init(&config.log_dir).context("Failed to initialize logging")?;

    match args.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => run_serve(config, bind).await,
        Command::Train {
            epochs,
            learning_rate,
        } => run_train(config, epochs, learning_rate).await,
    }
}

/// Start the HTTP service with the checkpoint-selected model.
async fn run_serve(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind_address = bind;
    }
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;

    let checkpoints = CheckpointStore::new(config.model_dir.clone())?;
    let device = get_device()?;
    let classifier = checkpoints.load_or_init(&device)?;

    tracing::info!(
        device = device_label(classifier.device()),
        trained = classifier.is_trained(),
        parameters = %format_param_count(classifier.parameter_count()),
        "Model ready"
    );

    DigitServer::new(config, checkpoints, classifier).serve().await
}

/// Foreground training run with console progress.
async fn run_train(
    config: Config,
    epochs: Option<usize>,
    learning_rate: Option<f64>,
) -> Result<()> {
    let params = TrainingParams::resolve(epochs, learning_rate, &config.training);
    let checkpoints = CheckpointStore::new(config.model_dir.clone())?;
    let data_dir = config.data_dir.clone();

    println!(
        "Training for {} epochs at learning rate {}",
        params.epochs, params.learning_rate
    );

    let summary = tokio::task::spawn_blocking(move || -> Result<_> {
        let dataset = data::load_mnist(&data_dir)?;
        let mut model = MnistClassifier::new(get_device()?)?;

        let summary = train_classifier(&mut model, &dataset, &params, |epoch, total, metrics| {
            println!(
                "Epoch {}/{} ({}%) | train loss {:.4} | test accuracy {:.2}%",
                epoch + 1,
                total,
                epoch_progress(epoch, total),
                metrics.train_loss,
                metrics.test_accuracy
            );
        })?;

        checkpoints.save_after_training(&model)?;
        Ok(summary)
    })
    .await
    .context("Training task failed")??;

    println!(
        "Training completed! Test accuracy: {:.2}%",
        summary.test_accuracy
    );
    Ok(())
}
