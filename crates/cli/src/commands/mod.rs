pub mod auth;
pub mod chats;
pub mod watch;

use tether_client::{Client, ClientConfig, ClientError};

/// Build a client and load the persisted session, failing when nobody is signed in.
pub fn signed_in_client(config: ClientConfig) -> anyhow::Result<Client> {
    let client = Client::connect(config)?;
    if client.restore()?.is_none() {
        return Err(ClientError::SessionTerminated.into());
    }
    Ok(client)
}
