//! Lua sandbox
//!
//! Agent code is untrusted-ish but the real isolation boundary is the
//! executor backend; the sandbox only removes the footguns that would
//! break the host outright: C module loading (ABI crashes) and process
//! exit. Installed rocks still load through the `package.cpath` searcher,
//! which the engine extends with the deps tree.

use mlua::prelude::*;

/// Apply sandbox restrictions to a fresh VM.
///
/// Blocks:
/// - `package.loadlib`: no arbitrary .so loading from Lua
/// - `package.cpath`: cleared; the engine re-adds the deps tree only
/// - `os.exit`: agent code must not take down the host process
pub fn apply_sandbox(lua: &Lua) -> LuaResult<()> {
    lua.load(
        r#"
        package.loadlib = nil
        package.cpath = ''
        os.exit = nil
    "#,
    )
    .set_name("@sandbox")
    .exec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_blocks_loadlib() {
        let lua = Lua::new();
        apply_sandbox(&lua).unwrap();

        let loadlib: LuaValue = lua
            .globals()
            .get::<LuaTable>("package")
            .unwrap()
            .get("loadlib")
            .unwrap();
        assert_eq!(loadlib, LuaValue::Nil);
    }

    #[test]
    fn test_sandbox_blocks_os_exit() {
        let lua = Lua::new();
        apply_sandbox(&lua).unwrap();

        let exit: LuaValue = lua
            .globals()
            .get::<LuaTable>("os")
            .unwrap()
            .get("exit")
            .unwrap();
        assert_eq!(exit, LuaValue::Nil);
    }

    #[test]
    fn test_sandbox_preserves_standard_libs() {
        let lua = Lua::new();
        apply_sandbox(&lua).unwrap();

        let upper: String = lua.load("string.upper('hello')").eval().unwrap();
        assert_eq!(upper, "HELLO");
        let joined: String = lua
            .load("table.concat({'a','b','c'}, ',')")
            .eval()
            .unwrap();
        assert_eq!(joined, "a,b,c");
    }
}
