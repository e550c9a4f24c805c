mod recommendations;

pub use recommendations::{
    DescriptionContext, DescriptionError, DescriptionGenerator, RecommendError,
    RecommendationEngine, TemplateDescriptionGenerator,
};
