/// Runs the wrapped closure once when dropped.
pub struct OnDrop<F: FnOnce()>(pub Option<F>);

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// `defer!(expr)` runs `expr` at the end of the enclosing scope, even on early return.
macro_rules! defer {
    ($func:block) => {
        let _on_drop = $crate::defer::OnDrop(Some(|| $func));
    };
    ($($stmt:expr);+ $(;)?) => {
        let _on_drop = $crate::defer::OnDrop(Some(|| { $($stmt;)+ }));
    };
}
