//! End-to-end pipelines: load, prepare, train, report.

pub mod cifar;
pub mod diabetes;
pub mod stock;

use tracing::info;

use crate::metrics::ClassificationReport;

pub use cifar::CifarReport;
pub use diabetes::DiabetesReport;
pub use stock::StockReport;

fn column_refs(columns: &[String]) -> Vec<&str> {
    columns.iter().map(String::as_str).collect()
}

fn log_report(experiment: &str, report: &ClassificationReport) {
    info!(
        experiment,
        samples = report.samples,
        accuracy = report.accuracy,
        precision = report.precision,
        recall = report.recall,
        f1 = report.f1,
        auc = ?report.auc,
        threshold = ?report.threshold,
        "test metrics"
    );
    for (class, row) in report.confusion_matrix.iter().enumerate() {
        info!(experiment, class, counts = ?row, "confusion matrix row");
    }
}
