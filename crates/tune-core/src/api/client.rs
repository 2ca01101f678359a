//! Blocking HTTP client for the AudioAddict API
//!
//! Two hosts are involved: the API host (authentication, track history,
//! ping) and each network's listen host (channel lists, stream URLs).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{ DateTime, Utc };
use reqwest::blocking::{ Client, Response };
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::account::AuthResponse;
use super::{ Account, ApiError, Channel, ChannelSource, Network, NetworkTable, StreamResolver, Streamlist, Track, Tracklist };


/// Default API base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://api.audioaddict.com/v1";

/// Timeout for API requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs( 15 );

const USER_AGENT: &str = concat!( "tune/", env!( "CARGO_PKG_VERSION" ) );


/// Information returned by the ping endpoint.
#[derive( Debug, Clone, PartialEq )]
pub struct PingInfo {
    pub api_version: f64,
    /// Server time, converted to UTC.
    pub time: DateTime<Utc>,
    pub ip: String,
    pub country: String,
}


#[derive( Debug, Deserialize )]
struct PingResponse {
    #[serde( default )]
    api_version: f64,
    time: String,
    #[serde( default )]
    ip: String,
    #[serde( default )]
    country: String,
}


/// AudioAddict API client.
///
/// Cheap to clone; clones share the connection pool and network table.
#[derive( Debug, Clone )]
pub struct ApiClient {
    http: Client,
    networks: Arc<NetworkTable>,
    api_base_url: String,
}


impl ApiClient {
    /// Creates a client against the default API host.
    pub fn new( networks: Arc<NetworkTable> ) -> Result<Self, ApiError> {
        Self::with_base_url( networks, DEFAULT_API_BASE_URL )
    }


    /// Creates a client against a custom API host.
    pub fn with_base_url( networks: Arc<NetworkTable>, api_base_url: &str ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent( USER_AGENT )
            .timeout( REQUEST_TIMEOUT )
            .build()?;

        Ok( Self {
            http,
            networks,
            api_base_url: api_base_url.trim_end_matches( '/' ).to_string(),
        })
    }


    /// Authenticates with username and password.
    pub fn authenticate_user_pass( &self, network: &Network, username: &str, password: &str ) -> Result<Account, ApiError> {
        self.authenticate( network, &[ ( "username", username ), ( "password", password ) ] )
    }


    /// Authenticates with a previously obtained API key.
    pub fn authenticate_api_key( &self, network: &Network, api_key: &str ) -> Result<Account, ApiError> {
        self.authenticate( network, &[ ( "api_key", api_key ) ] )
    }


    fn authenticate( &self, network: &Network, form: &[( &str, &str )] ) -> Result<Account, ApiError> {
        let url = format!( "{}/{}/members/authenticate", self.api_base_url, network.key );
        tracing::debug!( "Authenticating against {}", url );

        let response = self.http.post( &url ).form( form ).send()?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN => return Err( ApiError::InvalidCredentials ),
            status => {
                let body = response.text().unwrap_or_default();
                tracing::warn!( "Authentication failed with {}: {}", status, body );
                return Err( ApiError::CantAuthenticate( status.as_u16() ) );
            }
        }

        let auth: AuthResponse = response.json()?;
        let account = Account::from( auth );
        tracing::info!( "Authenticated account {} (premium: {})", account.id, account.premium );
        Ok( account )
    }


    /// Lists the channels available on a streamlist.
    pub fn channels( &self, network: &Network, streamlist: &Streamlist ) -> Result<Vec<Channel>, ApiError> {
        let url = format!( "{}/{}", network.listen_url_base, streamlist.key );
        let mut channels: Vec<Channel> = self.get_json( &url )?;

        let source = ChannelSource {
            network: network.key.clone(),
            streamlist: streamlist.key.clone(),
            premium: streamlist.premium,
        };
        for channel in &mut channels {
            channel.source = source.clone();
        }

        tracing::info!( "Loaded {} channels from {}/{}", channels.len(), network.key, streamlist.key );
        Ok( channels )
    }


    /// Returns the current track of every channel, keyed by channel id.
    pub fn track_history( &self, network: &Network ) -> Result<HashMap<String, Track>, ApiError> {
        let url = format!( "{}/{}/track_history", self.api_base_url, network.key );
        self.get_json( &url )
    }


    /// Returns the recent tracks of a channel, newest first.
    pub fn tracklist( &self, channel: &Channel ) -> Result<Tracklist, ApiError> {
        let url = format!(
            "{}/{}/track_history/channel/{}",
            self.api_base_url, channel.source.network, channel.id
        );
        self.get_json( &url )
    }


    /// Returns the track currently playing on a channel, skipping adverts.
    pub fn current_track( &self, channel: &Channel ) -> Result<Track, ApiError> {
        self.tracklist( channel )?
            .into_iter()
            .find( Track::is_track )
            .ok_or( ApiError::NoTracklist )
    }


    /// Pings the API; returns client location info and the server time.
    pub fn ping( &self ) -> Result<PingInfo, ApiError> {
        let url = format!( "{}/ping", self.api_base_url );
        let ping: PingResponse = self.get_json( &url )?;
        let time = DateTime::parse_from_rfc2822( &ping.time )?.with_timezone( &Utc );

        Ok( PingInfo {
            api_version: ping.api_version,
            time,
            ip: ping.ip,
            country: ping.country,
        })
    }


    fn get_json<T: DeserializeOwned>( &self, url: &str ) -> Result<T, ApiError> {
        let response = self.http.get( url ).send()?;
        Self::check_status( response, url )?.json().map_err( ApiError::from )
    }


    fn check_status( response: Response, url: &str ) -> Result<Response, ApiError> {
        match response.status() {
            status if status.is_success() => Ok( response ),
            StatusCode::NOT_FOUND => Err( ApiError::NotFound( url.to_string() ) ),
            status => Err( ApiError::Status { status: status.as_u16(), url: url.to_string() } ),
        }
    }
}


impl StreamResolver for ApiClient {
    fn stream_urls( &self, channel: &Channel, account: &Account ) -> Result<Vec<String>, ApiError> {
        if !account.can_stream( channel ) {
            return Err( ApiError::ChannelRequiresPremium );
        }

        let network = self.networks.get( &channel.source.network )?;

        // e.g. http://listen.di.fm/premium_high/dub?<listen key>
        let mut url = format!( "{}/{}/{}", network.listen_url_base, channel.source.streamlist, channel.key );
        if !account.listen_key.is_empty() {
            url.push( '?' );
            url.push_str( &account.listen_key );
        }

        let urls: Vec<String> = self.get_json( &url )?;
        tracing::debug!( "Resolved {} stream urls for {}", urls.len(), channel.key );
        Ok( urls )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::api::Encoding;

    use wiremock::matchers::{ body_string_contains, method, path, query_param };
    use wiremock::{ Mock, MockServer, ResponseTemplate };


    fn test_table( server: &MockServer ) -> Arc<NetworkTable> {
        let network = Network::new( "Test FM", "di", &server.uri() )
            .with_streamlist( Streamlist::new( "public3", false, 96, Encoding::Mp3 ) )
            .with_streamlist( Streamlist::new( "premium_high", true, 256, Encoding::Mp3 ) );
        Arc::new( NetworkTable::new( vec![ network ] ) )
    }


    fn account( premium: bool ) -> Account {
        Account {
            listen_key: "secret".into(),
            premium,
            ..Default::default()
        }
    }


    /// Runs a blocking client call off the async test runtime.
    async fn blocking<T, F>( f: F ) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        tokio::task::spawn_blocking( f ).await.unwrap()
    }


    #[tokio::test]
    async fn test_channels_are_stamped_with_source() {
        let server = MockServer::start().await;
        Mock::given( method( "GET" ) )
            .and( path( "/public3" ) )
            .respond_with( ResponseTemplate::new( 200 ).set_body_string(
                r#"[{"id":7,"key":"dub","name":"Dub","playlist":"http://x/dub.pls"},
                    {"id":8,"key":"trance","name":"Trance"}]"#,
            ))
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let channels = blocking( move || {
            let client = ApiClient::with_base_url( Arc::clone( &table ), &uri ).unwrap();
            let network = table.get( "di" ).unwrap();
            client.channels( network, network.streamlist_by_key( "public3" ).unwrap() )
        }).await.unwrap();

        assert_eq!( channels.len(), 2 );
        assert_eq!( channels[ 0 ].key, "dub" );
        assert_eq!( channels[ 0 ].playlist, "http://x/dub.pls" );
        assert_eq!( channels[ 1 ].playlist, "" );
        assert_eq!( channels[ 1 ].source.streamlist, "public3" );
        assert!( !channels[ 1 ].source.premium );
    }


    #[tokio::test]
    async fn test_stream_urls_use_listen_key() {
        let server = MockServer::start().await;
        Mock::given( method( "GET" ) )
            .and( path( "/premium_high/dub" ) )
            .and( query_param( "secret", "" ) )
            .respond_with( ResponseTemplate::new( 200 ).set_body_string(
                r#"["http://prem1.example.com/dub", "http://prem2.example.com/dub"]"#,
            ))
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let urls = blocking( move || {
            let client = ApiClient::with_base_url( table, &uri ).unwrap();
            let source = ChannelSource { network: "di".into(), streamlist: "premium_high".into(), premium: true };
            client.stream_urls( &Channel::new( 7, "dub", "Dub", source ), &account( true ) )
        }).await.unwrap();

        assert_eq!( urls, vec![ "http://prem1.example.com/dub", "http://prem2.example.com/dub" ] );
    }


    #[tokio::test]
    async fn test_stream_urls_premium_check_skips_request() {
        let server = MockServer::start().await;
        Mock::given( method( "GET" ) )
            .respond_with( ResponseTemplate::new( 200 ).set_body_string( "[]" ) )
            .expect( 0 )
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let result = blocking( move || {
            let client = ApiClient::with_base_url( table, &uri ).unwrap();
            let source = ChannelSource { network: "di".into(), streamlist: "premium_high".into(), premium: true };
            client.stream_urls( &Channel::new( 7, "dub", "Dub", source ), &account( false ) )
        }).await;

        assert!( matches!( result, Err( ApiError::ChannelRequiresPremium ) ) );
    }


    #[tokio::test]
    async fn test_stream_urls_not_found() {
        let server = MockServer::start().await;
        Mock::given( method( "GET" ) )
            .respond_with( ResponseTemplate::new( 404 ) )
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let result = blocking( move || {
            let client = ApiClient::with_base_url( table, &uri ).unwrap();
            let source = ChannelSource { network: "di".into(), streamlist: "public3".into(), premium: false };
            client.stream_urls( &Channel::new( 1, "gone", "Gone", source ), &account( false ) )
        }).await;

        assert!( matches!( result, Err( ApiError::NotFound( _ ) ) ) );
    }


    #[tokio::test]
    async fn test_authenticate_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given( method( "POST" ) )
            .and( path( "/di/members/authenticate" ) )
            .respond_with( ResponseTemplate::new( 403 ) )
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let result = blocking( move || {
            let client = ApiClient::with_base_url( Arc::clone( &table ), &uri ).unwrap();
            client.authenticate_user_pass( table.get( "di" ).unwrap(), "user", "wrong" )
        }).await;

        assert!( matches!( result, Err( ApiError::InvalidCredentials ) ) );
    }


    #[tokio::test]
    async fn test_authenticate_api_key() {
        let server = MockServer::start().await;
        Mock::given( method( "POST" ) )
            .and( path( "/di/members/authenticate" ) )
            .and( body_string_contains( "api_key=k3y" ) )
            .respond_with( ResponseTemplate::new( 200 ).set_body_string(
                r#"{"id":5,"api_key":"k3y","listen_key":"lk","first_name":"A","last_name":"B",
                    "network_favorite_channels":[{"channel_id":7,"position":0}],
                    "subscriptions":[{"status":"active"}]}"#,
            ))
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let account = blocking( move || {
            let client = ApiClient::with_base_url( Arc::clone( &table ), &uri ).unwrap();
            client.authenticate_api_key( table.get( "di" ).unwrap(), "k3y" )
        }).await.unwrap();

        assert_eq!( account.id, 5 );
        assert!( account.premium );
        assert!( account.is_favorite_channel( 7 ) );
    }


    #[tokio::test]
    async fn test_current_track_skips_adverts() {
        let server = MockServer::start().await;
        Mock::given( method( "GET" ) )
            .and( path( "/di/track_history/channel/7" ) )
            .respond_with( ResponseTemplate::new( 200 ).set_body_string(
                r#"[{"track":"Buy now","type":"advertisement","duration":30,"started":10},
                    {"track":"Artist - Song","type":"track","duration":200,"started":5}]"#,
            ))
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let track = blocking( move || {
            let client = ApiClient::with_base_url( table, &uri ).unwrap();
            let source = ChannelSource { network: "di".into(), streamlist: "public3".into(), premium: false };
            client.current_track( &Channel::new( 7, "dub", "Dub", source ) )
        }).await.unwrap();

        assert_eq!( track.name, "Artist - Song" );
        assert_eq!( track.duration, 200 );
    }


    #[tokio::test]
    async fn test_ping_parses_server_time() {
        let server = MockServer::start().await;
        Mock::given( method( "GET" ) )
            .and( path( "/ping" ) )
            .respond_with( ResponseTemplate::new( 200 ).set_body_string(
                r#"{"api_version":1.0,"time":"Mon, 2 Jan 2006 15:04:05 -0700","ip":"127.0.0.1","country":"NL"}"#,
            ))
            .mount( &server )
            .await;

        let table = test_table( &server );
        let uri = server.uri();
        let ping = blocking( move || {
            ApiClient::with_base_url( table, &uri ).unwrap().ping()
        }).await.unwrap();

        assert_eq!( ping.time.to_rfc3339(), "2006-01-02T22:04:05+00:00" );
        assert_eq!( ping.country, "NL" );
    }
}
