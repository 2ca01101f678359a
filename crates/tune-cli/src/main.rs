//! Tune CLI - Terminal UI internet radio player

mod cli;
mod input;
mod settings;
mod view;

use std::collections::HashMap;
use std::fs::{ self, OpenOptions };
use std::io::{ self, Write };
use std::path::PathBuf;
use std::sync::{ mpsc, Arc, Mutex };
use std::thread;
use std::time::{ Duration, Instant };

use anyhow::{ Context, Result };
use chrono::Utc;
use clap::Parser;
use crossterm::{
    event::{ self, Event, KeyCode, KeyEventKind, KeyModifiers },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, List, ListItem, ListState, Paragraph, Wrap },
};
use tracing_subscriber::EnvFilter;

use cli::Args;
use input::{ InputBuffer, InputMode };
use settings::Settings;
use view::ViewMode;

use tune_core::{
    api::Tracklist,
    command,
    Account, ApiClient, ApiError, Channel, Command, DriftClock, Network, NetworkTable,
    Session, SessionError, StreamEngine, Streamlist, Track,
};


/// Shortest wait before asking for the next track.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs( 2 );

/// Wait before retrying a failed track lookup.
const RETRY_DELAY: Duration = Duration::from_secs( 10 );

/// Interval between channel list track history refreshes.
const HISTORY_INTERVAL: Duration = Duration::from_secs( 60 );

const VOLUME_STEP: i32 = 5;


/// Results from session handlers and background lookups.
enum AppEvent {
    Playing( Channel ),
    Stopped,
    Title( Option<String> ),
    Error { message: String, keeps_channel: bool },
    Track { channel_id: u32, result: Result<Track, String> },
    History( Result<HashMap<String, Track>, String> ),
    Tracklist { channel_id: u32, result: Result<Tracklist, String> },
    Channels { streamlist: Streamlist, result: Result<Vec<Channel>, String> },
}


/// Application state.
struct App {
    session: Session,
    client: ApiClient,
    clock: DriftClock,
    account: Account,
    should_quit: bool,

    network: Network,
    streamlist: Streamlist,
    channels: Vec<Channel>,
    /// Current track per channel id, for the channel list.
    history: HashMap<String, Track>,
    history_refresh_at: Instant,
    /// Recent tracks of the channel shown in the history view.
    tracklist: Option<( u32, Tracklist )>,

    // View state
    view_mode: ViewMode,
    list_state: ListState,
    filter: Option<String>,
    favorites_only: bool,
    help_scroll: u16,

    // Input state
    input_mode: InputMode,
    input_buffer: InputBuffer,

    // Playback, as reported by the session
    playing: Option<Channel>,
    pending: Option<Channel>,
    is_playing: bool,
    stream_title: Option<String>,
    current_track: Option<Track>,
    refresh_at: Option<Instant>,
    volume: i32,

    // Status message (shown in status bar)
    status_message: Option<String>,
    status_clear_at: Option<Instant>,

    tx: mpsc::Sender<AppEvent>,
    rx: mpsc::Receiver<AppEvent>,

    settings: Settings,
}


impl App {
    fn new(
        session: Session,
        client: ApiClient,
        clock: DriftClock,
        account: Account,
        network: Network,
        streamlist: Streamlist,
        channels: Vec<Channel>,
        settings: Settings,
    ) -> Self {
        let ( tx, rx ) = mpsc::channel();

        let events = tx.clone();
        session.on_playing( move |channel| {
            let _ = events.send( AppEvent::Playing( channel.clone() ) );
        });
        let events = tx.clone();
        session.on_stopped( move || {
            let _ = events.send( AppEvent::Stopped );
        });
        let events = tx.clone();
        session.on_title_changed( move |_, title| {
            let _ = events.send( AppEvent::Title( title.map( str::to_string ) ) );
        });
        let events = tx.clone();
        session.on_error( move |e| {
            let keeps_channel = matches!( e, SessionError::ChannelRequiresPremium );
            let _ = events.send( AppEvent::Error { message: e.to_string(), keeps_channel } );
        });

        let volume = settings.volume.clamp( 0, 100 );
        session.set_volume( volume );

        let mut list_state = ListState::default();
        if !channels.is_empty() {
            list_state.select( Some( 0 ) );
        }

        Self {
            session,
            client,
            clock,
            account,
            should_quit: false,
            network,
            streamlist,
            channels,
            history: HashMap::new(),
            history_refresh_at: Instant::now(),
            tracklist: None,
            view_mode: ViewMode::Channels,
            list_state,
            filter: None,
            favorites_only: false,
            help_scroll: 0,
            input_mode: InputMode::Normal,
            input_buffer: InputBuffer::default(),
            playing: None,
            pending: None,
            is_playing: false,
            stream_title: None,
            current_track: None,
            refresh_at: None,
            volume,
            status_message: None,
            status_clear_at: None,
            tx,
            rx,
            settings,
        }
    }


    /// Sets a status message that auto-clears after a delay.
    fn set_status( &mut self, msg: impl Into<String> ) {
        self.status_message = Some( msg.into() );
        self.status_clear_at = Some( Instant::now() + Duration::from_secs( 3 ) );
    }


    /// Runs an API call off the UI thread and queues its result.
    fn background( &self, job: impl FnOnce( &ApiClient ) -> AppEvent + Send + 'static ) {
        let client = self.client.clone();
        let tx = self.tx.clone();
        thread::spawn( move || {
            let _ = tx.send( job( &client ) );
        });
    }


    /// Clears expired messages, applies queued events and fires due refreshes.
    fn tick( &mut self ) {
        if let Some( clear_at ) = self.status_clear_at {
            if Instant::now() >= clear_at {
                self.status_message = None;
                self.status_clear_at = None;
            }
        }

        while let Ok( event ) = self.rx.try_recv() {
            self.handle_event( event );
        }

        if self.refresh_at.is_some_and( |at| Instant::now() >= at ) {
            self.refresh_at = None;
            self.refresh_track();
        }

        if Instant::now() >= self.history_refresh_at {
            self.history_refresh_at = Instant::now() + HISTORY_INTERVAL;
            let network = self.network.clone();
            self.background( move |client| {
                AppEvent::History( client.track_history( &network ).map_err( |e| e.to_string() ) )
            });
        }
    }


    fn handle_event( &mut self, event: AppEvent ) {
        match event {
            AppEvent::Playing( channel ) => {
                tracing::info!( "Playing {}", channel.key );
                self.set_status( format!( "Now playing: {}", channel.name ) );
                if self.playing.as_ref().map( |c| c.id ) != Some( channel.id ) {
                    self.stream_title = None;
                    self.current_track = None;
                }
                self.settings.last_played_channel = Some( channel.key.clone() );
                self.settings.save();
                self.pending = None;
                self.playing = Some( channel );
                self.is_playing = true;
                self.refresh_track();
            }
            AppEvent::Stopped => {
                self.is_playing = false;
                self.refresh_at = None;
            }
            AppEvent::Title( title ) => {
                tracing::debug!( "Stream title: {:?}", title );
                self.stream_title = title;
                self.refresh_track();
            }
            AppEvent::Error { message, keeps_channel } => {
                self.set_status( format!( "Error: {}", message ) );
                if self.pending.take().is_some() && !keeps_channel {
                    self.playing = None;
                    self.current_track = None;
                    self.stream_title = None;
                }
                self.is_playing = false;
                self.refresh_at = None;
            }
            AppEvent::Track { channel_id, result } => {
                if self.playing.as_ref().map( |c| c.id ) != Some( channel_id ) || !self.is_playing {
                    return;
                }
                match result {
                    Ok( track ) => {
                        let remaining = track.remaining_at( self.clock.now() );
                        self.refresh_at = Some( Instant::now() + refresh_delay( remaining ) );
                        self.history.insert( channel_id.to_string(), track.clone() );
                        self.current_track = Some( track );
                    }
                    Err( e ) => {
                        tracing::warn!( "Failed to fetch current track: {}", e );
                        self.refresh_at = Some( Instant::now() + RETRY_DELAY );
                    }
                }
            }
            AppEvent::History( result ) => match result {
                Ok( history ) => self.history = history,
                Err( e ) => tracing::warn!( "Failed to fetch track history: {}", e ),
            },
            AppEvent::Tracklist { channel_id, result } => match result {
                Ok( tracks ) => self.tracklist = Some(( channel_id, tracks )),
                Err( e ) => self.set_status( format!( "Failed to load tracklist: {}", e ) ),
            },
            AppEvent::Channels { streamlist, result } => match result {
                Ok( channels ) => {
                    self.set_status( format!( "Switched to {}", streamlist.name() ) );
                    self.channels = channels;
                    self.settings.streamlist_key = Some( streamlist.key.clone() );
                    self.settings.save();
                    self.streamlist = streamlist;
                    self.clamp_selection();
                }
                Err( e ) => self.set_status( format!( "Failed to load {}: {}", streamlist.key, e ) ),
            },
        }
    }


    /// Asks the API for the track currently on air.
    fn refresh_track( &mut self ) {
        let Some( channel ) = self.playing.clone() else {
            return;
        };
        self.background( move |client| AppEvent::Track {
            channel_id: channel.id,
            result: client.current_track( &channel ).map_err( |e| e.to_string() ),
        });
    }


    fn load_tracklist( &mut self ) {
        let Some( channel ) = self.playing.clone().or_else( || self.selected_channel().cloned() ) else {
            return;
        };
        self.background( move |client| AppEvent::Tracklist {
            channel_id: channel.id,
            result: client.tracklist( &channel ).map_err( |e| e.to_string() ),
        });
    }


    /// Indices into `channels` shown in the channel list.
    fn visible( &self ) -> Vec<usize> {
        visible_channels( &self.channels, self.filter.as_deref(), self.favorites_only, &self.account )
    }


    fn selected_channel( &self ) -> Option<&Channel> {
        let index = *self.visible().get( self.list_state.selected()? )?;
        self.channels.get( index )
    }


    fn clamp_selection( &mut self ) {
        let len = self.visible().len();
        match self.list_state.selected() {
            _ if len == 0 => self.list_state.select( None ),
            Some( i ) if i >= len => self.list_state.select( Some( len - 1 ) ),
            None => self.list_state.select( Some( 0 ) ),
            _ => {}
        }
    }


    fn select_next( &mut self ) {
        let len = self.visible().len();
        if len > 0 {
            let next = self.list_state.selected().map_or( 0, |i| ( i + 1 ) % len );
            self.list_state.select( Some( next ) );
        }
    }


    fn select_previous( &mut self ) {
        let len = self.visible().len();
        if len > 0 {
            let prev = self.list_state.selected().map_or( 0, |i| if i == 0 { len - 1 } else { i - 1 } );
            self.list_state.select( Some( prev ) );
        }
    }


    /// Tunes to a channel, or toggles playback if it is already current.
    fn tune( &mut self, channel: Channel ) {
        if self.playing.as_ref().map( |c| c.id ) == Some( channel.id ) && self.pending.is_none() {
            self.toggle();
            return;
        }

        if !self.account.can_stream( &channel ) {
            self.set_status( format!( "{} requires a premium account", channel.name ) );
            return;
        }

        self.set_status( format!( "Tuning to {}...", channel.name ) );
        self.pending = Some( channel.clone() );
        self.session.set_channel( channel );
    }


    fn toggle( &mut self ) {
        if self.session.play_stop() {
            self.set_status( "Resuming..." );
        } else if self.playing.is_some() {
            self.is_playing = false;
            self.set_status( "Stopped" );
        }
    }


    fn change_volume( &mut self, volume: i32 ) {
        self.volume = volume.clamp( 0, 100 );
        self.session.set_volume( self.volume );
        self.settings.volume = self.volume;
        self.settings.save();
        self.set_status( format!( "Volume: {}%", self.volume ) );
    }


    fn handle_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        match self.input_mode {
            InputMode::Normal => self.handle_normal_key( code, modifiers ),
            InputMode::Command => self.handle_command_key( code ),
        }
    }


    fn handle_normal_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        if self.view_mode == ViewMode::Help {
            match code {
                KeyCode::Char( '?' ) | KeyCode::Esc | KeyCode::Char( 'q' ) => {
                    self.view_mode = ViewMode::Channels;
                    self.help_scroll = 0;
                }
                KeyCode::Up => self.help_scroll = self.help_scroll.saturating_sub( 1 ),
                KeyCode::Down => self.help_scroll = self.help_scroll.saturating_add( 1 ),
                _ => {}
            }
            return;
        }

        match code {
            KeyCode::Char( 'c' ) if modifiers.contains( KeyModifiers::CONTROL ) => self.should_quit = true,
            KeyCode::Char( 'q' ) | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char( '/' ) => {
                self.input_mode = InputMode::Command;
                self.input_buffer.clear();
            }
            KeyCode::Char( '?' ) => self.view_mode = ViewMode::Help,
            KeyCode::Tab => {
                self.view_mode = self.view_mode.next_tab();
                if self.view_mode == ViewMode::History {
                    self.load_tracklist();
                }
            }
            KeyCode::Up => self.select_previous(),
            KeyCode::Down => self.select_next(),
            KeyCode::Enter | KeyCode::Char( ' ' ) => {
                if self.view_mode == ViewMode::History || ( code == KeyCode::Char( ' ' ) && self.playing.is_some() ) {
                    self.toggle();
                } else if let Some( channel ) = self.selected_channel().cloned() {
                    self.tune( channel );
                }
            }
            KeyCode::Char( '+' ) | KeyCode::Char( '=' ) => self.change_volume( self.volume + VOLUME_STEP ),
            KeyCode::Char( '-' ) => self.change_volume( self.volume - VOLUME_STEP ),
            KeyCode::Char( 'f' ) => self.toggle_favorites(),
            _ => {}
        }
    }


    fn handle_command_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Enter => {
                let input = self.input_buffer.take();
                self.input_mode = InputMode::Normal;
                self.execute_command( &input );
            }
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input_buffer.clear();
            }
            KeyCode::Backspace => {
                if self.input_buffer.is_empty() {
                    self.input_mode = InputMode::Normal;
                } else {
                    self.input_buffer.backspace();
                }
            }
            KeyCode::Delete => self.input_buffer.delete(),
            KeyCode::Left => self.input_buffer.move_left(),
            KeyCode::Right => self.input_buffer.move_right(),
            KeyCode::Home => self.input_buffer.move_home(),
            KeyCode::End => self.input_buffer.move_end(),
            KeyCode::Char( c ) => self.input_buffer.insert( c ),
            _ => {}
        }
    }


    fn execute_command( &mut self, input: &str ) {
        match Command::parse( input ) {
            Ok( cmd ) => {
                tracing::debug!( "Command {:?}: {}", cmd, cmd.description() );
                if let Err( e ) = self.run_command( cmd ) {
                    self.set_status( format!( "Error: {}", e ) );
                }
            }
            Err( e ) => self.set_status( e.to_string() ),
        }
    }


    fn run_command( &mut self, cmd: Command ) -> Result<()> {
        match cmd {
            Command::Channel { key } => {
                let channel = self.channels
                    .iter()
                    .find( |c| c.key == key )
                    .cloned()
                    .with_context( || format!( "Unknown channel: {}", key ) )?;
                self.tune( channel );
            }
            Command::Quality { key: None } => {
                let keys: Vec<&str> = self.network
                    .streamlists()
                    .iter()
                    .filter( |s| !s.premium || self.account.premium )
                    .map( |s| s.key.as_str() )
                    .collect();
                self.set_status( format!( "Quality: {} (available: {})", self.streamlist.key, keys.join( ", " ) ) );
            }
            Command::Quality { key: Some( key ) } => {
                let streamlist = self.network.streamlist_by_key( &key )?.clone();
                anyhow::ensure!(
                    !streamlist.premium || self.account.premium,
                    "{} requires a premium account", streamlist.key
                );
                self.set_status( format!( "Loading {}...", streamlist.name() ) );
                let network = self.network.clone();
                self.background( move |client| {
                    let result = client.channels( &network, &streamlist ).map_err( |e| e.to_string() );
                    AppEvent::Channels { streamlist, result }
                });
            }
            Command::Play => {
                if self.playing.is_some() {
                    if !self.is_playing {
                        self.toggle();
                    }
                } else if let Some( channel ) = self.selected_channel().cloned() {
                    self.tune( channel );
                }
            }
            Command::Stop => {
                if self.is_playing {
                    self.toggle();
                }
            }
            Command::Volume { level: Some( level ) } => self.change_volume( level ),
            Command::Volume { level: None } => {
                let reported = self.session
                    .volume()
                    .map_or( "no media loaded".to_string(), |v| format!( "engine {}%", v ) );
                self.set_status( format!( "Volume: {}% ({})", self.volume, reported ) );
            }
            Command::Search { term } => {
                self.filter = term.map( |t| t.to_lowercase() );
                self.view_mode = ViewMode::Channels;
                self.clamp_selection();
                let shown = self.visible().len();
                self.set_status( format!( "{} channels", shown ) );
            }
            Command::Favorites => self.toggle_favorites(),
            Command::Help => self.view_mode = ViewMode::Help,
            Command::Quit => self.should_quit = true,
        }
        Ok(())
    }


    fn toggle_favorites( &mut self ) {
        self.favorites_only = !self.favorites_only;
        self.clamp_selection();
        self.set_status( if self.favorites_only { "Showing favorites" } else { "Showing all channels" } );
    }


    /// Selects a channel by key without tuning.
    fn select_key( &mut self, key: &str ) -> Option<Channel> {
        let position = self.visible().iter().position( |&i| self.channels[ i ].key == key )?;
        self.list_state.select( Some( position ) );
        self.selected_channel().cloned()
    }


    /// Stops playback, ends the session and persists settings.
    fn shutdown( self ) {
        self.session.close();
        self.settings.save();
    }
}


/// Returns the indices of channels matching the filter.
fn visible_channels( channels: &[Channel], filter: Option<&str>, favorites_only: bool, account: &Account ) -> Vec<usize> {
    channels
        .iter()
        .enumerate()
        .filter( |( _, c )| !favorites_only || account.is_favorite_channel( c.id ) )
        .filter( |( _, c )| filter.map_or( true, |f| {
            c.name.to_lowercase().contains( f ) || c.key.contains( f )
        }))
        .map( |( i, _ )| i )
        .collect()
}


/// Delay before asking for the next track; never shorter than two seconds.
fn refresh_delay( remaining: Duration ) -> Duration {
    remaining.max( MIN_REFRESH_DELAY )
}


/// Formats a duration as M:SS.
fn format_time( d: Duration ) -> String {
    let secs = d.as_secs();
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


/// Picks the requested streamlist if the account may use it, else the best
/// streamlist for the account's tier.
fn choose_streamlist( network: &Network, account: &Account, wanted: Option<&str> ) -> Result<Streamlist> {
    if let Some( key ) = wanted {
        match network.streamlist_by_key( key ) {
            Ok( s ) if !s.premium || account.premium => return Ok( s.clone() ),
            Ok( s ) => tracing::warn!( "Streamlist {} requires a premium account, falling back", s.key ),
            Err( e ) => tracing::warn!( "{}, falling back", e ),
        }
    }

    network
        .best_streamlist( account.premium )
        .cloned()
        .with_context( || format!( "{} has no streamlist for this account", network.name ) )
}


/// Sends logs to `{cache_dir}/tune/tune.log`; the terminal belongs to the UI.
fn init_logging( verbose: bool ) -> Result<Option<PathBuf>> {
    let Some( dir ) = dirs::cache_dir().map( |d| d.join( "tune" ) ) else {
        return Ok( None );
    };
    fs::create_dir_all( &dir ).with_context( || format!( "Failed to create {}", dir.display() ) )?;

    let path = dir.join( "tune.log" );
    let file = OpenOptions::new()
        .create( true )
        .append( true )
        .open( &path )
        .with_context( || format!( "Failed to open {}", path.display() ) )?;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( default_level ) );

    let _ = tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_ansi( false )
        .with_writer( Mutex::new( file ) )
        .try_init();

    Ok( Some( path ) )
}


fn prompt_line( prompt: &str ) -> Result<String> {
    print!( "{}", prompt );
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line( &mut line )?;
    Ok( line.trim().to_string() )
}


/// Reads a line without echoing it.
fn prompt_hidden( prompt: &str ) -> Result<String> {
    print!( "{}", prompt );
    io::stdout().flush()?;

    enable_raw_mode()?;
    let result = read_hidden();
    disable_raw_mode()?;
    println!();
    result
}


fn read_hidden() -> Result<String> {
    let mut secret = String::new();
    loop {
        if let Event::Key( key ) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Enter => return Ok( secret ),
                KeyCode::Backspace => {
                    secret.pop();
                }
                KeyCode::Char( 'c' ) if key.modifiers.contains( KeyModifiers::CONTROL ) => {
                    anyhow::bail!( "Login cancelled" );
                }
                KeyCode::Esc => anyhow::bail!( "Login cancelled" ),
                KeyCode::Char( c ) => secret.push( c ),
                _ => {}
            }
        }
    }
}


/// Logs in with an API key, falling back to prompting for credentials
/// until they are accepted.
fn login( client: &ApiClient, network: &Network, api_key: Option<&str> ) -> Result<Account> {
    if let Some( key ) = api_key {
        match client.authenticate_api_key( network, key ) {
            Ok( account ) => return Ok( account ),
            Err( ApiError::InvalidCredentials ) => {
                tracing::warn!( "API key rejected by {}", network.name );
                println!( "Saved API key was rejected, please log in again." );
            }
            Err( e ) => return Err( e ).context( "Failed to authenticate" ),
        }
    }

    println!( "Log in to {} (Esc to cancel)", network.name );
    loop {
        let username = prompt_line( "Username: " )?;
        let password = prompt_hidden( "Password: " )?;

        match client.authenticate_user_pass( network, &username, &password ) {
            Ok( account ) => return Ok( account ),
            Err( ApiError::InvalidCredentials ) => println!( "Invalid username or password." ),
            Err( e ) => return Err( e ).context( "Failed to authenticate" ),
        }
    }
}


fn main() -> Result<()> {
    let args = Args::parse();
    let log_path = init_logging( args.verbose )?;
    tracing::info!( "Starting tune {}", env!( "CARGO_PKG_VERSION" ) );

    let mut settings = Settings::load();

    let networks = Arc::new( NetworkTable::default() );
    let network_key = args.network.clone().unwrap_or_else( || settings.network.clone() );
    let network = networks
        .get( &network_key )
        .with_context( || {
            let keys: Vec<&str> = networks.networks().iter().map( |n| n.key.as_str() ).collect();
            format!( "Available networks: {}", keys.join( ", " ) )
        })?
        .clone();
    let client = ApiClient::new( Arc::clone( &networks ) )?;

    let api_key = args.api_key.clone().or_else( || settings.api_key.clone() );
    let account = login( &client, &network, api_key.as_deref() )?;
    settings.network = network.key.clone();
    settings.api_key = Some( account.api_key.clone() );
    settings.save();

    let wanted = args.quality.clone().or_else( || settings.streamlist_key.clone() );
    let streamlist = choose_streamlist( &network, &account, wanted.as_deref() )?;

    let clock = match client.ping() {
        Ok( ping ) => DriftClock::new( ping.time ),
        Err( e ) => {
            tracing::warn!( "Ping failed, using local time: {}", e );
            DriftClock::new( Utc::now() )
        }
    };

    let channels = client
        .channels( &network, &streamlist )
        .with_context( || format!( "Failed to load channels from {}", streamlist.key ) )?;

    let session = Session::new( account.clone(), client.clone(), StreamEngine::new )
        .context( "Failed to start audio" )?;

    let mut app = App::new( session, client, clock, account, network, streamlist, channels, settings );

    let start = args.channel.clone().or_else( || app.settings.last_played_channel.clone() );
    if let Some( key ) = start {
        match app.select_key( &key ) {
            Some( channel ) => app.tune( channel ),
            None => app.set_status( format!( "Channel {} not found", key ) ),
        }
    }

    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;
    let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;

    let result = run( &mut terminal, &mut app );

    // Cleanup
    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;
    app.shutdown();

    if let Err( ref e ) = result {
        tracing::error!( "Exiting on error: {:#}", e );
        if let Some( path ) = log_path {
            eprintln!( "See {} for details", path.display() );
        }
    }
    result
}


fn run( terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App ) -> Result<()> {
    loop {
        app.tick();

        terminal.draw( |frame| draw_ui( frame, app ) )?;

        if event::poll( Duration::from_millis( 100 ) )? {
            if let Event::Key( key ) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key( key.code, key.modifiers );
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}


/// Draws the main UI.
fn draw_ui( frame: &mut Frame, app: &mut App ) {
    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 2 ),  // Header
            Constraint::Min( 0 ),     // Main content
            Constraint::Length( 5 ),  // Now playing
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( frame.area() );

    let mut header = format!(
        "  TUNE - {} [{}] - {}",
        app.network.name,
        app.streamlist.name(),
        app.view_mode.label()
    );
    if app.favorites_only {
        header.push_str( " [FAVORITES]" );
    }
    if let Some( ref filter ) = app.filter {
        header.push_str( &format!( " [{}]", filter ) );
    }

    let header = Paragraph::new( header )
        .style( Style::default().fg( Color::Cyan ).bold() )
        .block( Block::default().borders( Borders::BOTTOM ) );
    frame.render_widget( header, chunks[ 0 ] );

    match app.view_mode {
        ViewMode::Channels => draw_channels( frame, app, chunks[ 1 ] ),
        ViewMode::History => draw_history( frame, app, chunks[ 1 ] ),
        ViewMode::Help => draw_help( frame, app, chunks[ 1 ] ),
    }

    draw_now_playing( frame, app, chunks[ 2 ] );
    draw_status_bar( frame, app, chunks[ 3 ] );
}


fn draw_channels( frame: &mut Frame, app: &mut App, area: Rect ) {
    let playing_id = app.playing.as_ref().map( |c| c.id );

    let items: Vec<ListItem> = app
        .visible()
        .into_iter()
        .map( |i| {
            let channel = &app.channels[ i ];
            let marker = if Some( channel.id ) == playing_id { "▶ " } else { "  " };
            let star = if app.account.is_favorite_channel( channel.id ) { "★ " } else { "  " };
            let style = if !app.account.can_stream( channel ) {
                Style::default().fg( Color::DarkGray )
            } else if Some( channel.id ) == playing_id {
                Style::default().fg( Color::Green )
            } else {
                Style::default()
            };

            let mut spans = vec![ Span::styled( format!( "{}{}{}", marker, star, channel.name ), style ) ];
            if let Some( track ) = app.history.get( &channel.id.to_string() ) {
                spans.push( Span::styled( format!( "  {}", track.name ), Style::default().fg( Color::Gray ) ) );
            }
            ListItem::new( Line::from( spans ) )
        })
        .collect();

    let title = format!( " Channels ({}) ", items.len() );
    let list = List::new( items )
        .block( Block::default().title( title ).borders( Borders::ALL ) )
        .highlight_style( Style::default().bg( Color::DarkGray ).bold() )
        .highlight_symbol( ">> " );

    frame.render_stateful_widget( list, area, &mut app.list_state );
}


fn draw_history( frame: &mut Frame, app: &App, area: Rect ) {
    let ( title, items ): ( String, Vec<ListItem> ) = match app.tracklist {
        Some(( channel_id, ref tracks )) => {
            let name = app.channels
                .iter()
                .find( |c| c.id == channel_id )
                .map_or( "Channel", |c| c.name.as_str() );
            let items = tracks
                .iter()
                .filter( |t| t.is_track() )
                .map( |t| {
                    let started = t.started_at().with_timezone( &chrono::Local ).format( "%H:%M" );
                    ListItem::new( format!( " {}  {}  ({})", started, t.name, format_time( t.duration() ) ) )
                })
                .collect();
            ( format!( " {} - Recently Played ", name ), items )
        }
        None => ( " Recently Played ".to_string(), vec![ ListItem::new( " Loading..." ) ] ),
    };

    let list = List::new( items ).block( Block::default().title( title ).borders( Borders::ALL ) );
    frame.render_widget( list, area );
}


fn draw_help( frame: &mut Frame, app: &mut App, area: Rect ) {
    let help_text = command::help_text();
    let line_count = help_text.lines().count() as u16;
    let visible_height = area.height.saturating_sub( 2 );

    let max_scroll = line_count.saturating_sub( visible_height );
    if app.help_scroll > max_scroll {
        app.help_scroll = max_scroll;
    }

    let help = Paragraph::new( help_text )
        .block( Block::default()
            .title( " Help (↑↓ scroll, ? or Esc to close) " )
            .borders( Borders::ALL )
        )
        .wrap( Wrap { trim: false } )
        .scroll(( app.help_scroll, 0 ));

    frame.render_widget( help, area );
}


fn draw_now_playing( frame: &mut Frame, app: &App, area: Rect ) {
    let ( state, name ) = match ( &app.pending, &app.playing ) {
        ( Some( pending ), _ ) => ( "…", pending.name.as_str() ),
        ( None, Some( playing ) ) if app.is_playing => ( "▶", playing.name.as_str() ),
        ( None, Some( playing ) ) => ( "■", playing.name.as_str() ),
        ( None, None ) => ( "■", "Not playing" ),
    };

    let mut lines = vec![
        Line::from( Span::styled( format!( " {} {} ", state, name ), Style::default().bold() ) ),
    ];

    let title = app.stream_title.clone().or_else( || app.current_track.as_ref().map( |t| t.name.clone() ) );
    if let Some( title ) = title {
        lines.push( Line::from( Span::styled( format!( "   {} ", title ), Style::default().fg( Color::Gray ) ) ) );
    }

    let vol_str = if app.volume == 0 { "muted".to_string() } else { format!( "{}%", app.volume ) };

    match app.current_track {
        Some( ref track ) if app.is_playing && track.duration > 0 => {
            let duration = track.duration();
            let elapsed = track.elapsed_at( app.clock.now() ).min( duration );

            let progress_width = 20;
            let progress = elapsed.as_secs_f64() / duration.as_secs_f64();
            let filled = ( progress * progress_width as f64 ).round() as usize;
            let bar = format!( "[{}{}]", "━".repeat( filled ), "─".repeat( progress_width - filled ) );

            lines.push( Line::from( format!(
                " {} {} / {}  {} ", bar, format_time( elapsed ), format_time( duration ), vol_str
            )));
        }
        _ => lines.push( Line::from( format!( " {} ", vol_str ) ) ),
    }

    let now_playing = Paragraph::new( lines )
        .block( Block::default().title( " Now Playing " ).borders( Borders::ALL ) );

    frame.render_widget( now_playing, area );
}


fn draw_status_bar( frame: &mut Frame, app: &App, area: Rect ) {
    let ( text, style ) = match app.input_mode {
        InputMode::Command => {
            ( format!( "/{}", app.input_buffer.content() ), Style::default().fg( Color::Yellow ) )
        }
        InputMode::Normal => {
            if let Some( ref msg ) = app.status_message {
                ( msg.clone(), Style::default().fg( Color::Green ) )
            } else {
                let hint = match app.view_mode {
                    ViewMode::Channels => " [/]Cmd [Tab]History [Enter]Tune [Space]Play/Stop [+/-]Vol [f]Favs [?]Help [q]Quit ",
                    ViewMode::History => " [Tab]Channels [Enter]Play/Stop [?]Help [q]Quit ",
                    ViewMode::Help => " [?]Close [Esc]Close ",
                };
                ( hint.to_string(), Style::default().fg( Color::DarkGray ) )
            }
        }
    };

    frame.render_widget( Paragraph::new( text ).style( style ), area );

    if app.input_mode == InputMode::Command {
        let cursor_x = area.x + 1 + app.input_buffer.cursor_char_pos() as u16;
        frame.set_cursor_position(( cursor_x, area.y ));
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use tune_core::api::ChannelSource;


    fn channel( id: u32, key: &str, name: &str ) -> Channel {
        Channel::new( id, key, name, ChannelSource::default() )
    }


    #[test]
    fn test_visible_channels_filter_and_favorites() {
        let channels = vec![
            channel( 1, "dub", "Dub" ),
            channel( 2, "dubstep", "Dubstep" ),
            channel( 3, "trance", "Trance" ),
        ];
        let account = Account { favorites: vec![ 2, 3 ], ..Default::default() };

        assert_eq!( visible_channels( &channels, None, false, &account ), vec![ 0, 1, 2 ] );
        assert_eq!( visible_channels( &channels, Some( "dub" ), false, &account ), vec![ 0, 1 ] );
        assert_eq!( visible_channels( &channels, None, true, &account ), vec![ 1, 2 ] );
        assert_eq!( visible_channels( &channels, Some( "dub" ), true, &account ), vec![ 1 ] );
    }


    #[test]
    fn test_refresh_delay_has_a_floor() {
        assert_eq!( refresh_delay( Duration::ZERO ), MIN_REFRESH_DELAY );
        assert_eq!( refresh_delay( Duration::from_secs( 95 ) ), Duration::from_secs( 95 ) );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( Duration::from_secs( 0 ) ), "0:00" );
        assert_eq!( format_time( Duration::from_secs( 245 ) ), "4:05" );
    }


    #[test]
    fn test_choose_streamlist() {
        let table = NetworkTable::default();
        let di = table.get( "di" ).unwrap();
        let free = Account::default();
        let premium = Account { premium: true, ..Default::default() };

        assert_eq!( choose_streamlist( di, &free, Some( "public1" ) ).unwrap().key, "public1" );
        assert_eq!( choose_streamlist( di, &premium, Some( "premium" ) ).unwrap().key, "premium" );

        // Premium streamlist on a free account falls back to the best public one
        assert_eq!( choose_streamlist( di, &free, Some( "premium_high" ) ).unwrap().key, "public3" );
        assert_eq!( choose_streamlist( di, &free, Some( "nope" ) ).unwrap().key, "public3" );
        assert_eq!( choose_streamlist( di, &premium, None ).unwrap().key, "premium_high" );
    }
}
