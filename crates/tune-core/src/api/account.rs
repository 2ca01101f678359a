//! Authenticated member account

use serde::Deserialize;

use super::Channel;


/// Credentials and entitlements of an authenticated member.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct Account {
    pub id: u64,
    pub api_key: String,
    pub listen_key: String,
    pub first_name: String,
    pub last_name: String,
    pub premium: bool,
    /// Favorite channel ids, in the member's order.
    pub favorites: Vec<u32>,
}


impl Account {
    /// Returns whether the channel is favorited in this account.
    pub fn is_favorite_channel( &self, id: u32 ) -> bool {
        self.favorites.contains( &id )
    }


    /// Returns whether this account is entitled to stream the channel.
    pub fn can_stream( &self, channel: &Channel ) -> bool {
        !channel.source.premium || self.premium
    }
}


/// Wire format of `members/authenticate`.
#[derive( Debug, Deserialize )]
pub( crate ) struct AuthResponse {
    #[serde( default )]
    id: u64,
    #[serde( default )]
    api_key: String,
    #[serde( default )]
    listen_key: String,
    #[serde( default )]
    first_name: Option<String>,
    #[serde( default )]
    last_name: Option<String>,
    #[serde( default )]
    network_favorite_channels: Vec<FavoriteEntry>,
    #[serde( default )]
    subscriptions: Vec<SubscriptionEntry>,
}


#[derive( Debug, Deserialize )]
struct FavoriteEntry {
    channel_id: u32,
}


#[derive( Debug, Deserialize )]
struct SubscriptionEntry {
    #[serde( default )]
    status: String,
}


impl From<AuthResponse> for Account {
    fn from( auth: AuthResponse ) -> Self {
        // Any active subscription unlocks the premium streamlists.
        let premium = auth.subscriptions.iter().any( |s| s.status == "active" );

        Self {
            id: auth.id,
            api_key: auth.api_key,
            listen_key: auth.listen_key,
            first_name: auth.first_name.unwrap_or_default(),
            last_name: auth.last_name.unwrap_or_default(),
            premium,
            favorites: auth.network_favorite_channels.into_iter().map( |f| f.channel_id ).collect(),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_account_from_auth_response() {
        let json = r#"{
            "api_key": "abc",
            "confirmed": true,
            "first_name": "Ada",
            "id": 66910,
            "last_name": null,
            "listen_key": "lk",
            "network_favorite_channels": [
                { "channel_id": 56, "position": 0 },
                { "channel_id": 3, "position": 1 }
            ],
            "subscriptions": [
                { "status": "expired" },
                { "status": "active", "trial": false }
            ]
        }"#;

        let auth: AuthResponse = serde_json::from_str( json ).unwrap();
        let account = Account::from( auth );

        assert_eq!( account.id, 66910 );
        assert_eq!( account.listen_key, "lk" );
        assert_eq!( account.first_name, "Ada" );
        assert_eq!( account.last_name, "" );
        assert!( account.premium );
        assert!( account.is_favorite_channel( 3 ) );
        assert!( !account.is_favorite_channel( 4 ) );
    }


    #[test]
    fn test_no_active_subscription_is_free() {
        let json = r#"{ "id": 1, "api_key": "k", "listen_key": "l", "subscriptions": [] }"#;
        let account = Account::from( serde_json::from_str::<AuthResponse>( json ).unwrap() );
        assert!( !account.premium );
        assert!( account.favorites.is_empty() );
    }
}
