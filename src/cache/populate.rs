//! All-or-nothing bulk population of a partition.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::debug;
use url::Url;

use super::entry::CacheKey;
use super::storage::CacheStore;
use crate::http::{Network, Request};

/// Fetch every URL and store them all in `partition`, or store nothing.
///
/// Any fetch failure or non-2xx status aborts the whole batch before the
/// store is touched. Returns the number of entries written.
pub async fn add_all<S, N>(cache: &S, network: &N, partition: &str, urls: &[Url]) -> Result<usize>
where
  S: CacheStore,
  N: Network,
{
  let fetches = urls.iter().map(|url| async move {
    let request = Request::get(url.clone());
    let response = network.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!("Fetching {} returned status {}", url, response.status));
    }
    Ok::<_, color_eyre::Report>((CacheKey::from_url(url), response))
  });

  let entries = try_join_all(fetches).await?;
  cache.put_all(partition, &entries)?;

  debug!(partition, count = entries.len(), "populated partition");
  Ok(entries.len())
}
