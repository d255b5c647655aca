pub mod cryocare;
pub mod subset;

pub use cryocare::{
    ExtractionDocument, PredictionDocument, TrainingConfigBuilder, TrainingDocument,
    TrainingDocuments, TrainingParams,
};
pub use subset::choose_subset;
