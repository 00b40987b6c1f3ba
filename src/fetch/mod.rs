pub mod http;
pub mod mock;
pub mod traits;

pub use http::HttpFetcher;
pub use mock::{MockFetcher, MockOutcome, MockResponse};
pub use traits::{BodyStream, FetchError, FetchRequest, FetchResponse, Fetcher};
