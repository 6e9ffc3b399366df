//! Transaction handle placeholder.

use crate::error::{Error, Result};

/// Handle for a server-side transaction.
///
/// Transactions are not implemented yet: every data operation accepts an
/// optional handle so the API surface is stable, but passing `Some` fails
/// the call with [`Error::TransactionsUnsupported`] before any RPC is
/// issued.
#[derive(Debug, Default)]
pub struct Transaction {
    _private: (),
}

impl Transaction {
    pub fn new() -> Transaction {
        Transaction { _private: () }
    }
}

/// Gate run at the top of every data operation.
pub(crate) fn ensure_no_transaction(tx: Option<&Transaction>) -> Result<()> {
    if tx.is_some() {
        return Err(Error::TransactionsUnsupported);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn some_handle_is_rejected() {
        assert!(ensure_no_transaction(None).is_ok());
        let tx = Transaction::new();
        assert!(matches!(
            ensure_no_transaction(Some(&tx)),
            Err(Error::TransactionsUnsupported)
        ));
    }
}
