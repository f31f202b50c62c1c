/// Identifies a registered source across `add`/`modify`/`delete` and the
/// readiness events `Epoll::wait` returns for it.
///
/// The endpoint stores the socket's own raw fd as the token, so looking up
/// the owning stage on a readiness event is a direct fd -> state lookup
/// rather than an extra indirection table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    #[inline]
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    #[inline]
    fn from(val: Token) -> usize {
        val.0
    }
}
