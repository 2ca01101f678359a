//! View mode management for the TUI.


/// Current view mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum ViewMode {
    /// Channel list with the track playing on each channel.
    #[default]
    Channels,

    /// Recently played tracks of the current channel.
    History,

    /// Help overlay - shows available commands.
    Help,
}


impl ViewMode {
    /// Returns the next view in tab order. Help stays until dismissed.
    pub fn next_tab( self ) -> Self {
        match self {
            ViewMode::Channels => ViewMode::History,
            ViewMode::History => ViewMode::Channels,
            ViewMode::Help => ViewMode::Help,
        }
    }


    /// Header label.
    pub fn label( self ) -> &'static str {
        match self {
            ViewMode::Channels => "CHANNELS",
            ViewMode::History => "HISTORY",
            ViewMode::Help => "HELP",
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_tab_cycles_between_lists() {
        assert_eq!( ViewMode::Channels.next_tab(), ViewMode::History );
        assert_eq!( ViewMode::History.next_tab(), ViewMode::Channels );
        assert_eq!( ViewMode::Help.next_tab(), ViewMode::Help );
    }
}
