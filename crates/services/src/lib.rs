pub mod services;

pub use services::changelog::{ChangelogError, ChangelogInfo, ChangelogService};
pub use services::clients::internal_forge::{
    BranchInfo, GitilesCommit, HttpInternalForgeClient, InternalForgeClient, InternalForgeError,
};
pub use services::clients::local_toolchain::{LocalToolchain, LocalToolchainError};
pub use services::clients::package_service::{
    HttpPackageServiceClient, PackageServiceClient, PackageServiceError, ProjectSearchResult,
    SubmitBuildRequest, SubmitBuildResult, TopicRelease, DEFAULT_ARCHES, DEFAULT_CRP_BASE_URL,
};
pub use services::clients::review_forge::{
    CommitDetail, CommitMessage, HttpReviewForgeClient, MergedBy, PullRequestDetail,
    ReviewForgeClient, ReviewForgeError, ReviewInfo,
};
pub use services::config::ConfigService;
pub use services::monitor::{Monitor, ProjectSnapshot};
pub use services::repository::{CommitInfo, RepositoryError, RepositoryService};
