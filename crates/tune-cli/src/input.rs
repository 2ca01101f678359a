//! Input mode handling for the TUI.
//!
//! Tracks whether keys drive shortcuts or the slash command line, and
//! holds the command line being edited.


/// Current input mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    /// Keyboard shortcuts active.
    #[default]
    Normal,

    /// Typing a slash command.
    Command,
}


/// Single-line text buffer with a cursor.
#[derive( Debug, Default )]
pub struct InputBuffer {
    content: String,
    /// Byte offset, always on a char boundary.
    cursor: usize,
}


impl InputBuffer {
    pub fn insert( &mut self, c: char ) {
        self.content.insert( self.cursor, c );
        self.cursor += c.len_utf8();
    }


    /// Deletes the character before the cursor.
    pub fn backspace( &mut self ) {
        if let Some( prev ) = self.prev_boundary() {
            self.content.remove( prev );
            self.cursor = prev;
        }
    }


    /// Deletes the character under the cursor.
    pub fn delete( &mut self ) {
        if self.cursor < self.content.len() {
            self.content.remove( self.cursor );
        }
    }


    pub fn clear( &mut self ) {
        self.content.clear();
        self.cursor = 0;
    }


    /// Returns the content and empties the buffer.
    pub fn take( &mut self ) -> String {
        self.cursor = 0;
        std::mem::take( &mut self.content )
    }


    pub fn content( &self ) -> &str {
        &self.content
    }


    /// Cursor position in characters, for placing the terminal cursor.
    pub fn cursor_char_pos( &self ) -> usize {
        self.content[ ..self.cursor ].chars().count()
    }


    pub fn move_left( &mut self ) {
        if let Some( prev ) = self.prev_boundary() {
            self.cursor = prev;
        }
    }


    pub fn move_right( &mut self ) {
        if let Some( c ) = self.content[ self.cursor.. ].chars().next() {
            self.cursor += c.len_utf8();
        }
    }


    pub fn move_home( &mut self ) {
        self.cursor = 0;
    }


    pub fn move_end( &mut self ) {
        self.cursor = self.content.len();
    }


    pub fn is_empty( &self ) -> bool {
        self.content.is_empty()
    }


    fn prev_boundary( &self ) -> Option<usize> {
        self.content[ ..self.cursor ].char_indices().last().map( |( i, _ )| i )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn typed( text: &str ) -> InputBuffer {
        let mut buf = InputBuffer::default();
        text.chars().for_each( |c| buf.insert( c ) );
        buf
    }


    #[test]
    fn test_edit_in_the_middle() {
        let mut buf = typed( "vol 4" );
        buf.move_left();
        buf.insert( '3' );
        assert_eq!( buf.content(), "vol 34" );

        buf.move_home();
        buf.delete();
        assert_eq!( buf.content(), "ol 34" );
    }


    #[test]
    fn test_multibyte_cursor() {
        let mut buf = typed( "ch café" );
        assert_eq!( buf.cursor_char_pos(), 7 );

        buf.backspace();
        assert_eq!( buf.content(), "ch caf" );

        buf.move_left();
        buf.move_right();
        buf.move_right();
        assert_eq!( buf.cursor_char_pos(), 6 );
    }


    #[test]
    fn test_take_empties() {
        let mut buf = typed( "help" );
        assert_eq!( buf.take(), "help" );
        assert!( buf.is_empty() );
        assert_eq!( buf.cursor_char_pos(), 0 );
    }
}
