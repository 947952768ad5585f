fn main() {
    soloctl::main();
}
