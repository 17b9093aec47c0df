use rollcall_backend::train::{self, backbone::OnnxBackbone, TrainConfig};
use rollcall_backend::utils::logging;
use tracing::info;

fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = TrainConfig::from_env();
    info!(
        "training on {:?} (img {}, batch {}, epochs {}, lr {}, augment {})",
        cfg.data_dir, cfg.img_size, cfg.batch_size, cfg.epochs, cfg.lr, cfg.augment
    );
    let backbone = OnnxBackbone::load(&cfg.backbone_path)?;
    let report = train::run(&cfg, &backbone)?;
    info!(
        "done: {} classes, {} epochs{}, best val loss {:.4}, test accuracy {:.2}%, checkpoint {:?}",
        report.classes,
        report.epochs_run,
        if report.early_stopped { " (early stop)" } else { "" },
        report.best_val_loss,
        report.test_accuracy,
        report.checkpoint
    );
    Ok(())
}
