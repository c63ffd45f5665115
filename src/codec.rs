use crate::types::Guild;

pub fn encode(guild: &Guild) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(guild)
}

/// Decodes a stored document, dropping channels left with no follows.
pub fn decode(bytes: &[u8]) -> Result<Guild, serde_json::Error> {
    let mut guild: Guild = serde_json::from_slice(bytes)?;
    guild.subscriptions.retain(|_, teams| !teams.is_empty());
    Ok(guild)
}
